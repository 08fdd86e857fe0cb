//! # Worker Runtime
//!
//! Startup and shutdown of the consuming side of a process.
//!
//! ## Startup Sequence
//!
//! 1. Resolve the worker profile (no profile: not a worker, nothing to do)
//! 2. Build the topology for the profile
//! 3. Check every profile task type has a registered handler
//! 4. Seal the registry
//! 5. Declare the topology on the broker
//! 6. Subscribe the work queue, then the interrupt queue
//!
//! Every step before consumption is fatal on failure. Once subscribed, errors
//! are isolated to the delivery that caused them.

use std::sync::Arc;

use tracing::{info, warn};

use super::consumer::RegistryDeliveryHandler;
use crate::config::TaskerConfig;
use crate::error::TaskerResult;
use crate::logging::{log_error, log_topology_operation};
use crate::messaging::{BrokerAdapter, DeliveryHandler, MessagingProvider, Subscription};
use crate::profile::WorkerProfile;
use crate::registry::TaskHandlerRegistry;
use crate::topology::{Topology, TopologyBuilder};

/// Consumers for one worker profile
#[derive(Debug)]
pub struct WorkerRuntime {
    profile: WorkerProfile,
    topology: Topology,
    registry: Arc<TaskHandlerRegistry>,
    work_subscription: Option<Subscription>,
    interrupt_subscription: Option<Subscription>,
}

impl WorkerRuntime {
    /// Start consuming for this process's profile
    ///
    /// Returns `Ok(None)` when the configuration names no worker profile, or
    /// names one that does not exist.
    pub async fn start(
        config: &TaskerConfig,
        registry: Arc<TaskHandlerRegistry>,
        provider: Arc<MessagingProvider>,
    ) -> TaskerResult<Option<Self>> {
        let Some(profile) = WorkerProfile::resolve(config) else {
            info!(
                worker = ?config.worker,
                "No worker profile resolved; process will publish only"
            );
            return Ok(None);
        };

        let topology = TopologyBuilder::build(&profile, config)?;
        registry.validate_profile(&profile)?;

        if let Err(e) = provider.declare_topology(&topology).await {
            log_topology_operation(
                "declare",
                &topology.exchange.name,
                Some(profile.name()),
                topology.bindings.len(),
                "failed",
                Some(&e.to_string()),
            );
            return Err(e.into());
        }
        log_topology_operation(
            "declare",
            &topology.exchange.name,
            Some(profile.name()),
            topology.bindings.len(),
            "success",
            None,
        );
        registry.seal();

        let handler: Arc<dyn DeliveryHandler> = Arc::new(RegistryDeliveryHandler::new(
            Arc::clone(&registry),
            config.consumers.requeue_on_failure,
        ));

        let work_subscription = provider
            .subscribe(
                &topology.work_queue.name,
                Arc::clone(&handler),
                config.consumers.work_concurrency,
            )
            .await?;

        let interrupt_subscription = match provider
            .subscribe(
                &topology.interrupt_queue.name,
                handler,
                config.consumers.interrupt_concurrency,
            )
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                log_error(
                    "worker",
                    "subscribe",
                    &e.to_string(),
                    Some(&topology.interrupt_queue.name),
                );
                work_subscription.cancel().await;
                return Err(e.into());
            }
        };

        info!(
            profile = %profile.name(),
            provider = provider.provider_name(),
            task_types = ?profile.task_types(),
            work_queue = %topology.work_queue.name,
            interrupt_queue = %topology.interrupt_queue.name,
            work_concurrency = config.consumers.work_concurrency,
            interrupt_concurrency = config.consumers.interrupt_concurrency,
            "Worker runtime started"
        );

        Ok(Some(Self {
            profile,
            topology,
            registry,
            work_subscription: Some(work_subscription),
            interrupt_subscription: Some(interrupt_subscription),
        }))
    }

    pub fn profile(&self) -> &WorkerProfile {
        &self.profile
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn registry(&self) -> &Arc<TaskHandlerRegistry> {
        &self.registry
    }

    /// Both consumer loops are still running
    pub fn is_running(&self) -> bool {
        let active = |s: &Option<Subscription>| s.as_ref().is_some_and(Subscription::is_active);
        active(&self.work_subscription) && active(&self.interrupt_subscription)
    }

    /// Stop both consumers and wait for in-flight deliveries to settle
    ///
    /// Running handlers are not interrupted; shutdown waits for them.
    pub async fn shutdown(&mut self) {
        let subscriptions = [
            self.work_subscription.take(),
            self.interrupt_subscription.take(),
        ];
        if subscriptions.iter().all(Option::is_none) {
            warn!(profile = %self.profile.name(), "Worker runtime already stopped");
            return;
        }

        for subscription in subscriptions.into_iter().flatten() {
            subscription.cancel().await;
        }
        info!(profile = %self.profile.name(), "Worker runtime stopped");
    }
}
