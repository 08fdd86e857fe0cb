//! Test fixtures for running a worker against the in-memory broker.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tasker_dispatch::config::{BrokerBackend, InterruptPolicyKind, TaskerConfig};
use tasker_dispatch::messaging::{InMemoryMessagingService, MessagingProvider, TaskMessage};
use tasker_dispatch::registry::{
    handler_fn, InterruptNotice, TaskCompletion, TaskHandler, TaskHandlerRegistry,
};
use tasker_dispatch::TaskerError;

/// The `emailer` configuration on the in-memory backend
pub fn emailer_config() -> TaskerConfig {
    TaskerConfig::default()
        .with_profile("emailer", ["sendEmail", "sendSms"])
        .with_profile("imaging", ["resizeImage"])
        .with_worker("emailer")
        .with_backend(BrokerBackend::InMemory)
}

pub fn in_memory_provider() -> Arc<MessagingProvider> {
    Arc::new(MessagingProvider::new_in_memory())
}

pub fn broker(provider: &MessagingProvider) -> &InMemoryMessagingService {
    provider
        .as_in_memory()
        .expect("tests run on the in-memory provider")
}

pub fn registry_for(config: &TaskerConfig) -> Arc<TaskHandlerRegistry> {
    Arc::new(TaskHandlerRegistry::from_config(config))
}

pub fn with_interrupt_policy(
    mut config: TaskerConfig,
    policy: InterruptPolicyKind,
    grace_window_ms: u64,
) -> TaskerConfig {
    config.interrupts.policy = policy;
    config.interrupts.grace_window_ms = grace_window_ms;
    config
}

/// Records every task a handler receives
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    tasks: Arc<Mutex<Vec<TaskMessage>>>,
    interrupts: Arc<Mutex<Vec<InterruptNotice>>>,
}

impl Recorder {
    pub fn tasks(&self) -> Vec<TaskMessage> {
        self.tasks.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn interrupts(&self) -> Vec<InterruptNotice> {
        self.interrupts.lock().clone()
    }

    /// Completes immediately
    pub fn completing(&self) -> Arc<dyn TaskHandler> {
        let tasks = Arc::clone(&self.tasks);
        handler_fn(move |task, _interrupt| {
            let tasks = Arc::clone(&tasks);
            async move {
                tasks.lock().push(task);
                Ok(TaskCompletion::completed())
            }
        })
    }

    /// Always fails
    pub fn failing(&self) -> Arc<dyn TaskHandler> {
        let tasks = Arc::clone(&self.tasks);
        handler_fn(move |task, _interrupt| {
            let tasks = Arc::clone(&tasks);
            async move {
                let (task_type, instance_id) = (task.task_type.clone(), task.instance_id.clone());
                tasks.lock().push(task);
                Err(TaskerError::handler_failed(task_type, instance_id, "provider unavailable"))
            }
        })
    }

    /// Runs until interrupted, or gives up after `limit`
    pub fn interruptible(&self, limit: Duration) -> Arc<dyn TaskHandler> {
        let tasks = Arc::clone(&self.tasks);
        let interrupts = Arc::clone(&self.interrupts);
        handler_fn(move |task, mut interrupt| {
            let tasks = Arc::clone(&tasks);
            let interrupts = Arc::clone(&interrupts);
            async move {
                tasks.lock().push(task);
                tokio::select! {
                    notice = interrupt.interrupted() => {
                        if let Some(notice) = notice {
                            interrupts.lock().push(notice);
                        }
                        Ok(TaskCompletion::interrupted())
                    }
                    _ = tokio::time::sleep(limit) => Ok(TaskCompletion::completed()),
                }
            }
        })
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future` with a five second limit
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation timed out")
}
