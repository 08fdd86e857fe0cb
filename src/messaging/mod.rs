//! # Broker Messaging Layer
//!
//! Provider-agnostic access to a topic broker.
//!
//! ## Architecture
//!
//! ```text
//! BrokerAdapter (trait)          <- declare / publish / subscribe / settle
//!   └── MessagingProvider (enum) <- enum dispatch, held as Arc by every component
//!         ├── RabbitMq(RabbitMqMessagingService)
//!         └── InMemory(InMemoryMessagingService)
//!
//! DeliveryHandler (trait)        <- consumer callback returning a DeliveryOutcome
//! ```
//!
//! Providers own settlement: a subscription runs the handler and then acks or
//! rejects according to the returned outcome.

pub mod errors;
pub mod message;
mod provider;
pub mod providers;
mod traits;
mod types;

pub use errors::MessagingError;
pub use message::{InterruptMessage, MessageMetadata, TaskMessage};
pub use provider::MessagingProvider;
pub use providers::{
    topic_matches, InMemoryMessagingService, PublishedMessage, RabbitMqMessagingService,
};
pub use traits::{BrokerAdapter, DeliveryHandler};
pub use types::{Delivery, DeliveryOutcome, ReceiptHandle, Subscription};
