//! # Tasker Configuration Validator
//!
//! Command-line tool for checking a dispatch configuration file before a
//! worker or publisher is started with it, and for previewing the broker
//! topology each worker profile would declare.

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tasker_dispatch::config::{ConfigLoader, TaskerConfig};
use tasker_dispatch::profile::WorkerProfile;
use tasker_dispatch::topology::{Topology, TopologyBuilder};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Tasker dispatch configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: $TASKER_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// List worker profiles and their task types
    Profiles,

    /// Show the topology a worker profile would declare
    Topology {
        /// Profile to render (default: the configured `worker`)
        #[arg(short, long)]
        profile: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Profiles) => list_profiles(&cli),
        Some(Commands::Topology { profile, format }) => {
            show_topology(&cli, profile.as_deref(), *format)
        }
    };

    match result {
        Ok(()) => {
            info!("config-validator completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("config-validator failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<TaskerConfig> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_from_env().context("loading from TASKER_CONFIG_PATH")?,
    };
    Ok(config)
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Tasker Dispatch Configuration");
    let config = load(cli)?;
    println!("✅ Configuration loaded and validated");

    println!("   Exchange:          {}", config.exchange);
    println!("   Work queue:        {}", config.work_queue_name);
    println!("   Interrupt queue:   {}", config.interrupt_queue_name);
    println!("   Broker:            {} ({})", config.broker.backend, config.broker.redacted_url());
    println!(
        "   Concurrency:       work={} interrupt={}",
        config.consumers.work_concurrency, config.consumers.interrupt_concurrency
    );

    match (&config.worker, WorkerProfile::resolve(&config)) {
        (None, _) => println!("ℹ️  No worker profile set: process publishes only"),
        (Some(name), None) => {
            println!("⚠️  Worker profile '{name}' is not defined: process will not consume")
        }
        (Some(_), Some(profile)) => {
            let topology = TopologyBuilder::build(&profile, &config)?;
            println!(
                "✅ Worker profile '{}' binds {} routing keys",
                profile.name(),
                topology.bindings.len()
            );
        }
    }

    for (name, profile) in &config.profiles {
        if profile.tasks.is_empty() {
            println!("⚠️  Profile '{name}' declares no task types and cannot be run");
        }
    }

    println!("\n🎉 Configuration is valid");
    Ok(())
}

fn list_profiles(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli)?;

    if config.profiles.is_empty() {
        println!("No worker profiles defined");
        return Ok(());
    }

    println!("📋 Worker Profiles:");
    for (name, profile) in &config.profiles {
        let marker = if config.worker.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("  {marker} {name}: {}", profile.tasks.join(", "));
    }
    Ok(())
}

fn show_topology(cli: &Cli, profile: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = load(cli)?;
    if let Some(name) = profile {
        config.worker = Some(name.to_string());
    }

    let Some(resolved) = WorkerProfile::resolve(&config) else {
        match &config.worker {
            Some(name) => bail!("worker profile '{name}' is not defined"),
            None => bail!("no worker profile configured; pass --profile"),
        }
    };
    let topology = TopologyBuilder::build(&resolved, &config)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&topology)?),
        OutputFormat::Table => print_topology_table(resolved.name(), &topology),
    }
    Ok(())
}

fn print_topology_table(profile: &str, topology: &Topology) {
    println!("🔀 Topology for profile '{profile}'");
    println!(
        "  exchange  {} ({}, durable={})",
        topology.exchange.name, topology.exchange.kind, topology.exchange.durable
    );
    for queue in topology.queues() {
        println!(
            "  queue     {} ({:?}, durable={}, auto_delete={})",
            queue.name, queue.role, queue.durable, queue.auto_delete
        );
    }
    println!("  {:<40} {}", "routing key", "queue");
    for binding in &topology.bindings {
        println!("  {:<40} {}", binding.routing_key, binding.queue);
    }
}
