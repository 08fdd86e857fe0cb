//! # Task and Interrupt Message Bodies
//!
//! JSON bodies carried on the exchange. The routing layer only looks at the
//! routing key; these structures are decoded by the registry on delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::MessagingError;

/// Identity and timing stamped on every published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Unique per publish; duplicates of one publish share it
    pub message_id: Uuid,
    pub published_at: DateTime<Utc>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            message_id: Uuid::new_v4(),
            published_at: Utc::now(),
        }
    }
}

/// A unit of work for a specific task instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_type: String,
    pub instance_id: String,
    /// Opaque to the dispatch layer
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl TaskMessage {
    pub fn new(
        task_type: impl Into<String>,
        instance_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            instance_id: instance_id.into(),
            payload,
            metadata: MessageMetadata::default(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Out-of-band signal for a specific task instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptMessage {
    pub task_type: String,
    pub instance_id: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl InterruptMessage {
    pub fn new(
        task_type: impl Into<String>,
        instance_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            instance_id: instance_id.into(),
            reason: reason.into(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
