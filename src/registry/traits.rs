//! # Task Handler Traits
//!
//! The execution contract between the dispatch core and application code.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tasker_dispatch::registry::{handler_fn, TaskCompletion, TaskHandlerRegistry};
//!
//! registry.register(
//!     "sendEmail",
//!     handler_fn(|task, mut interrupt| async move {
//!         tokio::select! {
//!             _ = send(&task.payload) => Ok(TaskCompletion::completed()),
//!             _ = interrupt.interrupted() => Ok(TaskCompletion::interrupted()),
//!         }
//!     }),
//! )?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::interrupts::InterruptSignal;
use crate::error::TaskerResult;
use crate::messaging::TaskMessage;

/// Successful end of a handler invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskCompletion {
    pub result: Option<serde_json::Value>,
    /// The handler stopped early because it observed its interrupt
    pub interrupted: bool,
}

impl TaskCompletion {
    pub fn completed() -> Self {
        Self {
            result: None,
            interrupted: false,
        }
    }

    pub fn with_result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            interrupted: false,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            result: None,
            interrupted: true,
        }
    }
}

/// Task handler execution trait
///
/// Handlers run concurrently for different instance ids and must be
/// reentrant. The dispatch core never stops a running handler; observing
/// `interrupt` and deciding how to stop is the handler's job.
///
/// ## Error Handling
///
/// Returning an error rejects the delivery (requeued only if
/// `consumers.requeue_on_failure` is set). Panics are caught by the registry
/// and treated as failures.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        task: TaskMessage,
        interrupt: InterruptSignal,
    ) -> TaskerResult<TaskCompletion>;
}

/// Adapter turning an async closure into a [`TaskHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskMessage, InterruptSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskerResult<TaskCompletion>> + Send + 'static,
{
    async fn handle(
        &self,
        task: TaskMessage,
        interrupt: InterruptSignal,
    ) -> TaskerResult<TaskCompletion> {
        (self.f)(task, interrupt).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskMessage, InterruptSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskerResult<TaskCompletion>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
