//! Error types for the Tasker dispatch layer.
//!
//! Setup-time variants (`ConfigurationError`, `DuplicateRegistration`, declaration
//! failures wrapped in `Messaging`) abort startup. Per-message variants
//! (`UnknownTaskType`, `InvalidMessage`, `HandlerFailed`) are isolated to the
//! delivery that produced them.

use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Handler already registered for task type '{task_type}'")]
    DuplicateRegistration { task_type: String },
    #[error("No handler registered for routing key '{routing_key}'")]
    UnknownTaskType { routing_key: String },
    #[error("Dispatch client is not connected")]
    NotConnected,
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Invalid message on '{routing_key}': {reason}")]
    InvalidMessage { routing_key: String, reason: String },
    #[error("Handler for '{task_type}' failed on instance '{instance_id}': {message}")]
    HandlerFailed {
        task_type: String,
        instance_id: String,
        message: String,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl TaskerError {
    /// Create a handler failure error
    pub fn handler_failed(
        task_type: impl Into<String>,
        instance_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerFailed {
            task_type: task_type.into(),
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    /// The delivery can never succeed, however often it is retried
    ///
    /// Covers messages no handler is registered for and bodies that do not
    /// decode. Handler failures are not included: a retry may succeed.
    pub fn is_undeliverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownTaskType { .. } | Self::InvalidMessage { .. }
        )
    }
}

impl From<crate::config::ConfigurationError> for TaskerError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        TaskerError::ConfigurationError(error.to_string())
    }
}

pub type TaskerResult<T> = std::result::Result<T, TaskerError>;
