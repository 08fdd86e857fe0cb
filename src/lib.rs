#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Dispatch
//!
//! Profile-driven task routing over a topic-based message broker.
//!
//! ## Overview
//!
//! Every process shares one topic exchange. A process configured with a
//! worker profile binds the profile's task types to its work queue (and their
//! `.interrupt` variants to its interrupt queue), then runs registered handlers
//! for matching deliveries. Any process can publish tasks and interrupts
//! through the [`DispatchClient`].
//!
//! ## Architecture
//!
//! ```text
//! TaskerConfig ──► WorkerProfile ──► TopologyBuilder ──► Topology
//!                                                           │ declare
//! DispatchClient ── publish ──► MessagingProvider ◄─────────┘
//!                                   │ subscribe
//!                                   ▼
//!                    RegistryDeliveryHandler ──► TaskHandlerRegistry
//!                                                  ├── TaskHandler (work key)
//!                                                  └── InterruptTracker (`.interrupt` key)
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration, environment substitution, validation
//! - [`profile`] - Worker profile resolution
//! - [`topology`] - Exchange, queue and binding derivation; routing keys
//! - [`messaging`] - Broker adapter trait with RabbitMQ and in-memory providers
//! - [`registry`] - Task handlers and interrupt tracking
//! - [`worker`] - Subscriptions and delivery settlement
//! - [`client`] - Publishing tasks and interrupts
//! - [`system`] - Process bootstrap and shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tasker_dispatch::{
//!     handler_fn, BrokerBackend, TaskCompletion, TaskHandlerRegistry, TaskerConfig, TaskerSystem,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TaskerConfig::default()
//!     .with_profile("emailer", ["sendEmail"])
//!     .with_worker("emailer")
//!     .with_backend(BrokerBackend::InMemory);
//!
//! let registry = Arc::new(TaskHandlerRegistry::from_config(&config));
//! registry.register(
//!     "sendEmail",
//!     handler_fn(|_task, _interrupt| async { Ok(TaskCompletion::completed()) }),
//! )?;
//!
//! let system = TaskerSystem::bootstrap(config, registry).await?;
//! system.client().enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"})).await?;
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod profile;
pub mod registry;
pub mod system;
pub mod topology;
pub mod worker;

pub use client::{ClientState, DispatchClient, PublishReceipt};
pub use config::{
    BrokerBackend, BrokerConfig, ConfigLoader, ConfigurationError, ConsumerConfig,
    InterruptConfig, InterruptPolicyKind, TaskerConfig,
};
pub use error::{TaskerError, TaskerResult};
pub use messaging::{
    BrokerAdapter, Delivery, DeliveryOutcome, InterruptMessage, MessagingError,
    MessagingProvider, TaskMessage,
};
pub use profile::WorkerProfile;
pub use registry::{
    handler_fn, DispatchOutcome, InterruptDisposition, InterruptSignal, InterruptTracker,
    TaskCompletion, TaskHandler, TaskHandlerRegistry,
};
pub use system::TaskerSystem;
pub use topology::{interrupt_routing_key, routing_key, Topology, TopologyBuilder};
pub use worker::WorkerRuntime;
