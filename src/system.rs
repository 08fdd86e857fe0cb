//! # Tasker System
//!
//! Process-level wiring: one broker provider, one dispatch client, and (for
//! worker processes) one worker runtime, all sharing the same provider.
//!
//! ```rust,ignore
//! let config = ConfigLoader::load_from_env()?;
//! let registry = Arc::new(TaskHandlerRegistry::from_config(&config));
//! registry.register("sendEmail", handler_fn(send_email))?;
//!
//! let system = TaskerSystem::bootstrap(config, registry).await?;
//! system.client().enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"})).await?;
//! ```

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::client::DispatchClient;
use crate::config::TaskerConfig;
use crate::error::TaskerResult;
use crate::logging;
use crate::messaging::{BrokerAdapter, MessagingProvider};
use crate::registry::TaskHandlerRegistry;
use crate::worker::WorkerRuntime;

pub struct TaskerSystem {
    /// Identifies this process in logs
    pub system_id: Uuid,
    config: Arc<TaskerConfig>,
    provider: Arc<MessagingProvider>,
    registry: Arc<TaskHandlerRegistry>,
    client: Arc<DispatchClient>,
    worker: Option<WorkerRuntime>,
}

impl std::fmt::Debug for TaskerSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskerSystem")
            .field("system_id", &self.system_id)
            .field("provider", &self.provider.provider_name())
            .field("task_types", &self.registry.registered_task_types())
            .field("client_state", &self.client.state())
            .field(
                "worker_profile",
                &self.worker.as_ref().map(|w| w.profile().name().to_string()),
            )
            .finish()
    }
}

impl TaskerSystem {
    /// Validate `config`, connect the configured broker and start the process
    pub async fn bootstrap(
        config: TaskerConfig,
        registry: Arc<TaskHandlerRegistry>,
    ) -> TaskerResult<Self> {
        logging::init_structured_logging();
        config.validate_config()?;
        info!(
            backend = %config.broker.backend,
            url = %config.broker.redacted_url(),
            "Connecting messaging provider"
        );
        let provider = Arc::new(MessagingProvider::connect(&config.broker).await?);
        Self::bootstrap_with_provider(config, registry, provider).await
    }

    /// Start the process on an already connected provider
    ///
    /// Closes nothing on failure; the caller keeps ownership of `provider`.
    pub async fn bootstrap_with_provider(
        config: TaskerConfig,
        registry: Arc<TaskHandlerRegistry>,
        provider: Arc<MessagingProvider>,
    ) -> TaskerResult<Self> {
        logging::init_structured_logging();
        let system_id = Uuid::new_v4();
        config.validate_config()?;

        let client = Arc::new(DispatchClient::new(Arc::clone(&provider), &config));
        client.connect().await?;

        let worker =
            WorkerRuntime::start(&config, Arc::clone(&registry), Arc::clone(&provider)).await?;

        info!(
            system_id = %system_id,
            provider = provider.provider_name(),
            worker_profile = worker.as_ref().map(|w| w.profile().name()),
            "Tasker system bootstrapped"
        );

        Ok(Self {
            system_id,
            config: Arc::new(config),
            provider,
            registry,
            client,
            worker,
        })
    }

    pub fn config(&self) -> &Arc<TaskerConfig> {
        &self.config
    }

    pub fn client(&self) -> &Arc<DispatchClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<TaskHandlerRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn worker(&self) -> Option<&WorkerRuntime> {
        self.worker.as_ref()
    }

    /// This process consumes a worker profile
    pub fn is_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop consuming, stop publishing, then close the broker connection
    pub async fn shutdown(mut self) -> TaskerResult<()> {
        if let Some(worker) = self.worker.as_mut() {
            worker.shutdown().await;
        }
        self.client.shutdown();

        if let Err(e) = self.provider.close().await {
            warn!(system_id = %self.system_id, error = %e, "Failed to close messaging provider");
            return Err(e.into());
        }
        info!(system_id = %self.system_id, "Tasker system shut down");
        Ok(())
    }
}
