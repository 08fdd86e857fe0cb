//! # Task Handler Registry
//!
//! Process-wide map from task type to handler.
//!
//! ## Lifecycle
//! ```text
//! register()* -> validate_profile() -> seal() -> dispatch()*
//! ```
//!
//! Registration happens during setup. Once the worker starts consuming, the
//! registry is sealed and read-only; late registrations fail instead of racing
//! with dispatch.
//!
//! ## Dispatch
//!
//! The routing key decides the path. `sendEmail` runs the `sendEmail` handler;
//! `sendEmail.interrupt` raises the interrupt for a `sendEmail` instance and
//! never looks up a task type literally named `sendEmail.interrupt`.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::interrupts::{InterruptDisposition, InterruptTracker};
use super::traits::{TaskCompletion, TaskHandler};
use crate::config::TaskerConfig;
use crate::error::{TaskerError, TaskerResult};
use crate::logging::log_registry_operation;
use crate::messaging::{Delivery, InterruptMessage, TaskMessage};
use crate::profile::WorkerProfile;
use crate::topology::{validate_task_type, DeliveryKind, RoutingKey};

/// Result of dispatching one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A work delivery ran its handler to completion
    Completed(TaskCompletion),
    /// An interrupt delivery was applied to the tracker
    Interrupt(InterruptDisposition),
}

pub struct TaskHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    sealed: AtomicBool,
    interrupts: Arc<InterruptTracker>,
}

impl fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandlerRegistry")
            .field("task_types", &self.registered_task_types())
            .field("sealed", &self.is_sealed())
            .field("interrupts", &self.interrupts)
            .finish()
    }
}

impl TaskHandlerRegistry {
    pub fn new(interrupts: Arc<InterruptTracker>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            interrupts,
        }
    }

    /// Registry with an interrupt tracker built from `config.interrupts`
    pub fn from_config(config: &TaskerConfig) -> Self {
        Self::new(Arc::new(InterruptTracker::from_config(&config.interrupts)))
    }

    pub fn interrupts(&self) -> &Arc<InterruptTracker> {
        &self.interrupts
    }

    /// Register the handler for `task_type`
    ///
    /// Fails with `DuplicateRegistration` if a handler already exists; the
    /// existing handler stays active.
    pub fn register(&self, task_type: &str, handler: Arc<dyn TaskHandler>) -> TaskerResult<()> {
        if self.is_sealed() {
            log_registry_operation(
                "register",
                Some(task_type),
                "rejected",
                Some("registry sealed"),
            );
            return Err(TaskerError::ConfigurationError(format!(
                "cannot register '{task_type}': registry is sealed once consumption starts"
            )));
        }

        validate_task_type(task_type).map_err(TaskerError::ValidationError)?;

        let mut handlers = self.handlers.write();
        if handlers.contains_key(task_type) {
            log_registry_operation("register", Some(task_type), "duplicate", None);
            return Err(TaskerError::DuplicateRegistration {
                task_type: task_type.to_string(),
            });
        }
        handlers.insert(task_type.to_string(), handler);
        drop(handlers);

        log_registry_operation("register", Some(task_type), "success", None);
        Ok(())
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Registered task types, sorted
    pub fn registered_task_types(&self) -> Vec<String> {
        let mut task_types: Vec<String> = self.handlers.read().keys().cloned().collect();
        task_types.sort();
        task_types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Forbid further registration
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::AcqRel) {
            log_registry_operation(
                "seal",
                None,
                "success",
                Some(&format!("{} handlers", self.len())),
            );
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Check every task type in `profile` has a handler
    ///
    /// Fails with `ConfigurationError` naming all missing task types.
    pub fn validate_profile(&self, profile: &WorkerProfile) -> TaskerResult<()> {
        let handlers = self.handlers.read();
        let missing: Vec<&str> = profile
            .task_types()
            .iter()
            .map(String::as_str)
            .filter(|task_type| !handlers.contains_key(*task_type))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let details = missing.join(", ");
        log_registry_operation("validate_profile", None, "failed", Some(&details));
        Err(TaskerError::ConfigurationError(format!(
            "worker profile '{}' lists task types with no registered handler: {details}",
            profile.name()
        )))
    }

    fn handler_for(
        &self,
        task_type: &str,
        routing_key: &str,
    ) -> TaskerResult<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| TaskerError::UnknownTaskType {
                routing_key: routing_key.to_string(),
            })
    }

    /// Route a delivery to its handler or to the interrupt tracker
    pub async fn dispatch(&self, delivery: &Delivery) -> TaskerResult<DispatchOutcome> {
        let key = RoutingKey::parse(&delivery.routing_key);
        let handler = self.handler_for(key.task_type, &delivery.routing_key)?;

        match key.kind {
            DeliveryKind::Work => {
                let task = TaskMessage::from_bytes(&delivery.body).map_err(|e| {
                    invalid_message(&delivery.routing_key, e.to_string())
                })?;
                check_body_task_type(&task.task_type, key.task_type, &delivery.routing_key)?;
                self.run_handler(handler, task).await.map(DispatchOutcome::Completed)
            }
            DeliveryKind::Interrupt => {
                let interrupt = InterruptMessage::from_bytes(&delivery.body).map_err(|e| {
                    invalid_message(&delivery.routing_key, e.to_string())
                })?;
                check_body_task_type(&interrupt.task_type, key.task_type, &delivery.routing_key)?;

                let disposition =
                    self.interrupts
                        .raise(key.task_type, &interrupt.instance_id, &interrupt.reason);
                Ok(DispatchOutcome::Interrupt(disposition))
            }
        }
    }

    async fn run_handler(
        &self,
        handler: Arc<dyn TaskHandler>,
        task: TaskMessage,
    ) -> TaskerResult<TaskCompletion> {
        let task_type = task.task_type.clone();
        let instance_id = task.instance_id.clone();
        let active = self.interrupts.begin(&task_type, &instance_id);

        debug!(
            task_type = %task_type,
            instance_id = %instance_id,
            message_id = %task.metadata.message_id,
            already_interrupted = active.signal().is_interrupted(),
            "Invoking task handler"
        );

        let result = AssertUnwindSafe(handler.handle(task, active.signal()))
            .catch_unwind()
            .await;
        drop(active);

        match result {
            Ok(Ok(completion)) => {
                info!(
                    task_type = %task_type,
                    instance_id = %instance_id,
                    interrupted = completion.interrupted,
                    "Task handler completed"
                );
                Ok(completion)
            }
            Ok(Err(error @ TaskerError::HandlerFailed { .. })) => Err(error),
            Ok(Err(error)) => Err(TaskerError::handler_failed(
                task_type,
                instance_id,
                error.to_string(),
            )),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                warn!(
                    task_type = %task_type,
                    instance_id = %instance_id,
                    panic = %message,
                    "Task handler panicked"
                );
                Err(TaskerError::handler_failed(
                    task_type,
                    instance_id,
                    format!("handler panicked: {message}"),
                ))
            }
        }
    }
}

fn invalid_message(routing_key: &str, reason: impl Into<String>) -> TaskerError {
    TaskerError::InvalidMessage {
        routing_key: routing_key.to_string(),
        reason: reason.into(),
    }
}

fn check_body_task_type(
    body_task_type: &str,
    routed_task_type: &str,
    routing_key: &str,
) -> TaskerResult<()> {
    if body_task_type == routed_task_type {
        Ok(())
    } else {
        Err(invalid_message(
            routing_key,
            format!("body names task type '{body_task_type}'"),
        ))
    }
}
