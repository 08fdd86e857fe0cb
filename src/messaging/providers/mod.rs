//! # Broker Providers
//!
//! Concrete [`BrokerAdapter`] implementations.

mod in_memory;
mod rabbitmq;

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

pub use in_memory::{topic_matches, InMemoryMessagingService, PublishedMessage};
pub use rabbitmq::RabbitMqMessagingService;

use super::traits::{BrokerAdapter, DeliveryHandler};
use super::types::Delivery;

/// Run the handler for one delivery on its own task and settle the outcome
///
/// The permit is held until settlement so the consumer's concurrency limit
/// covers handler execution and the ack/reject round trip.
pub(crate) fn spawn_delivery<A>(
    adapter: A,
    handler: Arc<dyn DeliveryHandler>,
    delivery: Delivery,
    permit: OwnedSemaphorePermit,
) where
    A: BrokerAdapter + Clone,
{
    tokio::spawn(async move {
        let outcome = handler.handle(&delivery).await;
        if let Err(e) = adapter.settle(&delivery, outcome).await {
            warn!(
                provider = adapter.provider_name(),
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                outcome = %outcome,
                error = %e,
                "Failed to settle delivery"
            );
        }
        drop(permit);
    });
}
