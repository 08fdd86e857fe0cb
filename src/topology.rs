//! # Routing Topology
//!
//! Pure derivation of broker entities from a worker profile:
//!
//! ```text
//!                        ┌── key = <task type> ───────────▶ work queue
//! topic exchange ────────┤
//!                        └── key = <task type>.interrupt ─▶ interrupt queue
//! ```
//!
//! Interrupts get their own queue so they never wait behind a work backlog
//! competing for the same consumer slots; both queues share one exchange so
//! publishers only need the routing-key convention.
//!
//! Building is deterministic and does no I/O. Bindings are held in a sorted set,
//! so two topologies built from the same inputs compare equal and declare in the
//! same order.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::TaskerConfig;
use crate::constants::routing::{
    INTERRUPT_SUFFIX, MAX_ROUTING_KEY_BYTES, MULTI_WORD_WILDCARD, SINGLE_WORD_WILDCARD,
};
use crate::error::{TaskerError, TaskerResult};
use crate::logging::log_topology_operation;
use crate::profile::WorkerProfile;

/// Routing key for normal delivery of a task type (the task type verbatim)
pub fn routing_key(task_type: &str) -> String {
    task_type.to_string()
}

/// Routing key for interrupt delivery of a task type
pub fn interrupt_routing_key(task_type: &str) -> String {
    format!("{task_type}{INTERRUPT_SUFFIX}")
}

/// Check that a task type can be used as an exact-match routing key
///
/// Rejects wildcards (they would bind more than the declared task), the
/// interrupt suffix (it would collide with another task's interrupt key),
/// whitespace, and keys too long for AMQP once suffixed.
pub fn validate_task_type(task_type: &str) -> Result<(), String> {
    if task_type.is_empty() {
        return Err("task type must not be empty".to_string());
    }
    if task_type.chars().any(char::is_whitespace) {
        return Err(format!("task type '{task_type}' must not contain whitespace"));
    }
    if task_type.contains(SINGLE_WORD_WILDCARD) || task_type.contains(MULTI_WORD_WILDCARD) {
        return Err(format!(
            "task type '{task_type}' must not contain routing wildcards '*' or '#'"
        ));
    }
    if task_type.ends_with(INTERRUPT_SUFFIX) {
        return Err(format!(
            "task type '{task_type}' must not end with the reserved suffix '{INTERRUPT_SUFFIX}'"
        ));
    }
    if task_type.len() + INTERRUPT_SUFFIX.len() > MAX_ROUTING_KEY_BYTES {
        return Err(format!(
            "task type '{task_type}' is too long for an interrupt routing key"
        ));
    }
    Ok(())
}

/// Which path a delivery takes through the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Work,
    Interrupt,
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work => write!(f, "work"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// A routing key split into its task type and delivery kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingKey<'a> {
    pub task_type: &'a str,
    pub kind: DeliveryKind,
}

impl<'a> RoutingKey<'a> {
    /// Strip the interrupt suffix, if present
    ///
    /// `"sendEmail.interrupt"` is the interrupt path for `"sendEmail"`, never a
    /// literal task type.
    pub fn parse(key: &'a str) -> Self {
        match key.strip_suffix(INTERRUPT_SUFFIX) {
            Some(task_type) => Self {
                task_type,
                kind: DeliveryKind::Interrupt,
            },
            None => Self {
                task_type: key,
                kind: DeliveryKind::Work,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Routes by routing-key pattern; exact keys are a special case
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => write!(f, "topic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRole {
    Work,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDeclaration {
    pub name: String,
    pub role: QueueRole,
    pub durable: bool,
    pub auto_delete: bool,
    /// Consumed by this process
    pub subscribe: bool,
}

impl QueueDeclaration {
    fn consumed(name: &str, role: QueueRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            durable: true,
            auto_delete: false,
            subscribe: true,
        }
    }
}

/// Exchange -> queue rule for one exact routing key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// Declarative broker layout for one worker profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub exchange: ExchangeDeclaration,
    pub work_queue: QueueDeclaration,
    pub interrupt_queue: QueueDeclaration,
    pub bindings: BTreeSet<Binding>,
}

impl Topology {
    pub fn queues(&self) -> [&QueueDeclaration; 2] {
        [&self.work_queue, &self.interrupt_queue]
    }

    /// Bindings targeting the given queue, in declaration order
    pub fn bindings_for<'a>(&'a self, queue: &'a str) -> impl Iterator<Item = &'a Binding> + 'a {
        self.bindings.iter().filter(move |b| b.queue == queue)
    }

    /// Routing keys bound to the work queue
    pub fn work_routing_keys(&self) -> BTreeSet<&str> {
        self.bindings_for(&self.work_queue.name)
            .map(|b| b.routing_key.as_str())
            .collect()
    }

    /// Routing keys bound to the interrupt queue
    pub fn interrupt_routing_keys(&self) -> BTreeSet<&str> {
        self.bindings_for(&self.interrupt_queue.name)
            .map(|b| b.routing_key.as_str())
            .collect()
    }
}

/// Derives a [`Topology`] from a profile and configuration
#[derive(Debug)]
pub struct TopologyBuilder;

impl TopologyBuilder {
    /// The exchange alone; publishers declare it without any queues
    pub fn exchange(config: &TaskerConfig) -> ExchangeDeclaration {
        ExchangeDeclaration {
            name: config.exchange.clone(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
        }
    }

    /// Build the topology for `profile`
    ///
    /// Fails with `ConfigurationError` if the profile declares no task types:
    /// a worker with nothing bound would sit on an empty queue forever.
    pub fn build(profile: &WorkerProfile, config: &TaskerConfig) -> TaskerResult<Topology> {
        if profile.is_empty() {
            log_topology_operation(
                "build",
                &config.exchange,
                Some(profile.name()),
                0,
                "failed",
                Some("profile declares no task types"),
            );
            return Err(TaskerError::ConfigurationError(format!(
                "worker profile '{}' declares no task types",
                profile.name()
            )));
        }

        let exchange = Self::exchange(config);
        let work_queue = QueueDeclaration::consumed(&config.work_queue_name, QueueRole::Work);
        let interrupt_queue =
            QueueDeclaration::consumed(&config.interrupt_queue_name, QueueRole::Interrupt);

        let bindings = profile
            .task_types()
            .iter()
            .flat_map(|task_type| {
                [
                    Binding {
                        exchange: exchange.name.clone(),
                        queue: work_queue.name.clone(),
                        routing_key: routing_key(task_type),
                    },
                    Binding {
                        exchange: exchange.name.clone(),
                        queue: interrupt_queue.name.clone(),
                        routing_key: interrupt_routing_key(task_type),
                    },
                ]
            })
            .collect::<BTreeSet<_>>();

        log_topology_operation(
            "build",
            &exchange.name,
            Some(profile.name()),
            bindings.len(),
            "success",
            None,
        );

        Ok(Topology {
            exchange,
            work_queue,
            interrupt_queue,
            bindings,
        })
    }
}
