//! Delivery handler bridging broker subscriptions to the task registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::TaskerError;
use crate::logging::log_error;
use crate::messaging::{Delivery, DeliveryHandler, DeliveryOutcome};
use crate::registry::{DispatchOutcome, TaskHandlerRegistry};

/// Dispatches each delivery through the registry and maps the result to a settlement
///
/// Used for both the work queue and the interrupt queue; the routing key
/// decides which path a delivery takes.
#[derive(Debug, Clone)]
pub struct RegistryDeliveryHandler {
    registry: Arc<TaskHandlerRegistry>,
    requeue_on_failure: bool,
}

impl RegistryDeliveryHandler {
    pub fn new(registry: Arc<TaskHandlerRegistry>, requeue_on_failure: bool) -> Self {
        Self {
            registry,
            requeue_on_failure,
        }
    }

    /// Settlement for a dispatch result
    ///
    /// Failed handlers are requeued at most once: a delivery the broker marks
    /// as redelivered is rejected to the dead letter path.
    pub fn outcome_for(
        &self,
        delivery: &Delivery,
        result: &Result<DispatchOutcome, TaskerError>,
    ) -> DeliveryOutcome {
        match result {
            Ok(_) => DeliveryOutcome::Ack,
            Err(error) if error.is_undeliverable() => DeliveryOutcome::reject(),
            Err(_) => DeliveryOutcome::Reject {
                requeue: self.requeue_on_failure && !delivery.redelivered,
            },
        }
    }
}

#[async_trait]
impl DeliveryHandler for RegistryDeliveryHandler {
    async fn handle(&self, delivery: &Delivery) -> DeliveryOutcome {
        let result = self.registry.dispatch(delivery).await;
        let outcome = self.outcome_for(delivery, &result);

        match &result {
            Ok(DispatchOutcome::Completed(completion)) => debug!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                interrupted = completion.interrupted,
                "Work delivery completed"
            ),
            Ok(DispatchOutcome::Interrupt(disposition)) => debug!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                disposition = %disposition,
                "Interrupt delivery applied"
            ),
            Err(error) if error.is_undeliverable() => warn!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                error = %error,
                outcome = %outcome,
                "Rejecting undeliverable message"
            ),
            Err(error) => log_error(
                "worker",
                "dispatch",
                &error.to_string(),
                Some(&format!(
                    "queue={} routing_key={} redelivered={} outcome={outcome}",
                    delivery.queue, delivery.routing_key, delivery.redelivered
                )),
            ),
        }

        outcome
    }
}
