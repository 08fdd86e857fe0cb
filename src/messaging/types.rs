//! # Messaging Types
//!
//! Core types shared by every broker provider.

use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle for acknowledging or rejecting a delivery
///
/// The format is provider-specific:
/// - RabbitMQ: channel delivery tag as string
/// - InMemory: broker-wide delivery counter as string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as a numeric delivery tag
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ReceiptHandle {
    fn from(tag: u64) -> Self {
        Self(tag.to_string())
    }
}

impl From<&str> for ReceiptHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

/// A message handed to a subscriber, pending settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was consumed from
    pub queue: String,
    /// Exchange it was published to
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub receipt_handle: ReceiptHandle,
    /// The broker has delivered this message before
    pub redelivered: bool,
}

/// How a subscriber settles a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    /// `requeue = false` dead-letters (or discards) the message
    Reject { requeue: bool },
}

impl DeliveryOutcome {
    pub fn reject() -> Self {
        Self::Reject { requeue: false }
    }

    pub fn requeue() -> Self {
        Self::Reject { requeue: true }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Reject { requeue: true } => write!(f, "reject(requeue)"),
            Self::Reject { requeue: false } => write!(f, "reject"),
        }
    }
}

/// A running consumer on one queue
///
/// Dropping the subscription signals the consumer loop to stop; use
/// [`Subscription::cancel`] to also wait for in-flight deliveries to settle.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            queue: queue.into(),
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The consumer loop is still running
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop consuming and wait for the loop (and its in-flight handlers) to finish
    pub async fn cancel(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(queue = %self.queue, error = %e, "Consumer loop ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
