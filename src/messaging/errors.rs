//! # Messaging Error Types
//!
//! Transport-level failures raised by broker providers. Declaration-time errors
//! abort startup; publish-time errors are surfaced to the caller unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker is not connected")]
    NotConnected,

    #[error("Topology declaration failed: {entity}: {message}")]
    TopologyDeclaration { entity: String, message: String },

    #[error("Publish failed: {exchange}/{routing_key}: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Subscribe failed: {queue_name}: {message}")]
    Subscribe { queue_name: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Exchange not found: {exchange}")]
    ExchangeNotFound { exchange: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a not-connected error (closed or never opened)
    pub fn not_connected() -> Self {
        Self::NotConnected
    }

    /// Create a topology declaration error for an exchange, queue or binding
    pub fn topology(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TopologyDeclaration {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    /// Create a subscribe error
    pub fn subscribe(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(
        queue_name: impl Into<String>,
        receipt: impl std::fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: format!("ack(receipt={receipt})"),
            message: message.into(),
        }
    }

    /// Create a nack error
    pub fn nack(
        queue_name: impl Into<String>,
        receipt: impl std::fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: format!("nack(receipt={receipt})"),
            message: message.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create an exchange not found error
    pub fn exchange_not_found(exchange: impl Into<String>) -> Self {
        Self::ExchangeNotFound {
            exchange: exchange.into(),
        }
    }

    /// Create a message serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create an invalid receipt handle error
    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::Internal {
            message: format!("Invalid receipt handle: {}", handle.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Conversion from serde_json::Error to MessagingError
impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::deserialization(err.to_string())
        } else {
            MessagingError::serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MessagingError::publish("tasker-work-x", "sendEmail", "nacked by broker");
        assert_eq!(
            err.to_string(),
            "Publish failed: tasker-work-x/sendEmail: nacked by broker"
        );

        let err = MessagingError::topology("queue tasker-work-q", "access refused");
        assert!(err.to_string().contains("tasker-work-q"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_slice(b"{not json");
        let err: MessagingError = parse.unwrap_err().into();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }
}
