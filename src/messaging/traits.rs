//! # Broker Adapter Traits
//!
//! The narrow boundary between the dispatch core and the broker transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Delivery, DeliveryOutcome, Subscription};
use super::MessagingError;
use crate::topology::{ExchangeDeclaration, Topology};

/// Consumer-side callback for deliveries from one queue
///
/// Returns how the delivery should be settled; the provider performs the
/// ack or reject. Must not panic: a panicking handler leaves its delivery
/// unsettled until the consumer channel closes.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> DeliveryOutcome;
}

/// Transport operations the dispatch core depends on
///
/// Implementations must make `declare_topology` idempotent and must not retry
/// failed publishes internally; callers own retry policy.
#[async_trait]
pub trait BrokerAdapter: Send + Sync + 'static {
    /// Provider name for logging
    fn provider_name(&self) -> &'static str;

    /// Declare only the exchange (publish-only processes)
    async fn declare_exchange(
        &self,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError>;

    /// Declare the exchange, both queues and every binding
    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError>;

    /// Publish `body` with `routing_key`; returns once the broker has accepted it
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), MessagingError>;

    /// Start consuming `queue`, running at most `concurrency` handlers at once
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
    ) -> Result<Subscription, MessagingError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError>;

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError>;

    /// Settle a delivery according to `outcome`
    async fn settle(
        &self,
        delivery: &Delivery,
        outcome: DeliveryOutcome,
    ) -> Result<(), MessagingError> {
        match outcome {
            DeliveryOutcome::Ack => self.ack(delivery).await,
            DeliveryOutcome::Reject { requeue } => self.reject(delivery, requeue).await,
        }
    }

    /// Whether the transport is currently usable
    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Stop every consumer and release the connection; later calls fail with `NotConnected`
    async fn close(&self) -> Result<(), MessagingError>;
}
