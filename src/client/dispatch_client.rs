//! # Dispatch Client
//!
//! Publishes tasks and interrupts to the topic exchange.
//!
//! The client is stateful: it must be connected before publishing, and once
//! shut down it stays shut down. Publishing never retries; a failed publish is
//! returned to the caller, who owns the retry policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::config::TaskerConfig;
use crate::error::{TaskerError, TaskerResult};
use crate::logging::{log_publish_operation, log_topology_operation};
use crate::messaging::{
    BrokerAdapter, InterruptMessage, MessageMetadata, MessagingError, MessagingProvider,
    TaskMessage,
};
use crate::topology::{
    interrupt_routing_key, routing_key, validate_task_type, ExchangeDeclaration, TopologyBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    NotConnected,
    Connected,
    ShutDown,
}

/// Broker acknowledgement of a published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub message_id: Uuid,
    pub exchange: String,
    pub routing_key: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DispatchClient {
    provider: Arc<MessagingProvider>,
    exchange: ExchangeDeclaration,
    state: RwLock<ClientState>,
}

impl DispatchClient {
    pub fn new(provider: Arc<MessagingProvider>, config: &TaskerConfig) -> Self {
        Self {
            provider,
            exchange: TopologyBuilder::exchange(config),
            state: RwLock::new(ClientState::NotConnected),
        }
    }

    /// Declare the exchange and start accepting publishes
    ///
    /// Idempotent while connected. A shut-down client cannot reconnect.
    pub async fn connect(&self) -> TaskerResult<()> {
        match self.state() {
            ClientState::Connected => return Ok(()),
            ClientState::ShutDown => return Err(TaskerError::NotConnected),
            ClientState::NotConnected => {}
        }

        if let Err(e) = self.provider.declare_exchange(&self.exchange).await {
            log_topology_operation(
                "declare_exchange",
                &self.exchange.name,
                None,
                0,
                "failed",
                Some(&e.to_string()),
            );
            return Err(map_messaging_error(e));
        }
        log_topology_operation(
            "declare_exchange",
            &self.exchange.name,
            None,
            0,
            "success",
            None,
        );

        self.mark_connected()
    }

    /// A `shutdown` that landed while the exchange was being declared wins
    fn mark_connected(&self) -> TaskerResult<()> {
        let mut state = self.state.write();
        match *state {
            ClientState::NotConnected => {
                *state = ClientState::Connected;
                Ok(())
            }
            ClientState::Connected => Ok(()),
            ClientState::ShutDown => Err(TaskerError::NotConnected),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    pub fn exchange(&self) -> &str {
        &self.exchange.name
    }

    /// Publish a task for the workers bound to `task_type`
    pub async fn enqueue(
        &self,
        task_type: &str,
        instance_id: &str,
        payload: serde_json::Value,
    ) -> TaskerResult<PublishReceipt> {
        self.ensure_connected()?;
        validate_request(task_type, instance_id)?;

        let message = TaskMessage::new(task_type, instance_id, payload);
        let body = message.to_bytes()?;
        self.publish(&routing_key(task_type), instance_id, &body, &message.metadata)
            .await
    }

    /// Ask whichever worker runs `instance_id` to stop
    ///
    /// At most once: if no worker holds the instance the interrupt may be lost,
    /// depending on the worker's interrupt policy.
    pub async fn interrupt(
        &self,
        task_type: &str,
        instance_id: &str,
        reason: &str,
    ) -> TaskerResult<PublishReceipt> {
        self.ensure_connected()?;
        validate_request(task_type, instance_id)?;

        let message = InterruptMessage::new(task_type, instance_id, reason);
        let body = message.to_bytes()?;
        self.publish(
            &interrupt_routing_key(task_type),
            instance_id,
            &body,
            &message.metadata,
        )
        .await
    }

    /// Stop accepting publishes; the shared provider stays open
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        if *state != ClientState::ShutDown {
            *state = ClientState::ShutDown;
            tracing::info!(exchange = %self.exchange.name, "Dispatch client shut down");
        }
    }

    fn ensure_connected(&self) -> TaskerResult<()> {
        match self.state() {
            ClientState::Connected => Ok(()),
            ClientState::NotConnected | ClientState::ShutDown => Err(TaskerError::NotConnected),
        }
    }

    async fn publish(
        &self,
        routing_key: &str,
        instance_id: &str,
        body: &[u8],
        metadata: &MessageMetadata,
    ) -> TaskerResult<PublishReceipt> {
        match self
            .provider
            .publish(&self.exchange.name, routing_key, body)
            .await
        {
            Ok(()) => {
                log_publish_operation(
                    "publish",
                    &self.exchange.name,
                    routing_key,
                    instance_id,
                    "success",
                    None,
                );
                Ok(PublishReceipt {
                    message_id: metadata.message_id,
                    exchange: self.exchange.name.clone(),
                    routing_key: routing_key.to_string(),
                    published_at: metadata.published_at,
                })
            }
            Err(e) => {
                log_publish_operation(
                    "publish",
                    &self.exchange.name,
                    routing_key,
                    instance_id,
                    "failed",
                    Some(&e.to_string()),
                );
                Err(map_messaging_error(e))
            }
        }
    }
}

fn validate_request(task_type: &str, instance_id: &str) -> TaskerResult<()> {
    validate_task_type(task_type).map_err(TaskerError::ValidationError)?;
    if instance_id.trim().is_empty() {
        return Err(TaskerError::ValidationError(
            "instance id must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn map_messaging_error(error: MessagingError) -> TaskerError {
    match error {
        MessagingError::NotConnected => TaskerError::NotConnected,
        other => TaskerError::Messaging(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> (DispatchClient, Arc<MessagingProvider>) {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let client = DispatchClient::new(Arc::clone(&provider), &TaskerConfig::default());
        (client, provider)
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails_fast() {
        let (client, provider) = client();
        assert_eq!(client.state(), ClientState::NotConnected);

        let error = client
            .enqueue("sendEmail", "inst-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(error, TaskerError::NotConnected));
        assert!(provider.as_in_memory().unwrap().published().is_empty());
    }

    #[tokio::test]
    async fn test_connect_declares_exchange_only() {
        let (client, provider) = client();
        client.connect().await.unwrap();
        client.connect().await.unwrap();

        let broker = provider.as_in_memory().unwrap();
        assert!(broker.has_exchange("tasker-work-x"));
        assert!(!broker.has_queue("tasker-work-q"));
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[test]
    fn test_shutdown_during_declare_fails_connect() {
        let (client, _provider) = client();
        client.shutdown();

        assert!(matches!(client.mark_connected(), Err(TaskerError::NotConnected)));
        assert_eq!(client.state(), ClientState::ShutDown);
    }

    #[tokio::test]
    async fn test_enqueue_and_interrupt_routing_keys() {
        let (client, provider) = client();
        client.connect().await.unwrap();

        let task_receipt = client
            .enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"}))
            .await
            .unwrap();
        assert_eq!(task_receipt.routing_key, "sendEmail");
        assert_eq!(task_receipt.exchange, "tasker-work-x");

        let receipt = client
            .interrupt("sendEmail", "inst-1", "user-cancelled")
            .await
            .unwrap();
        assert_eq!(receipt.routing_key, "sendEmail.interrupt");

        let published = provider.as_in_memory().unwrap().published();
        assert_eq!(published.len(), 2);
        let task = TaskMessage::from_bytes(&published[0].body).unwrap();
        assert_eq!(task.instance_id, "inst-1");
        assert_eq!(task.payload, json!({"to": "a@b.com"}));
        assert_eq!(task.metadata.message_id, task_receipt.message_id);
        assert_eq!(published[1].routing_key, "sendEmail.interrupt");
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let (client, _provider) = client();
        client.connect().await.unwrap();

        for task_type in ["", "send.*", "sendEmail.interrupt"] {
            let error = client
                .enqueue(task_type, "inst-1", json!({}))
                .await
                .unwrap_err();
            assert!(matches!(error, TaskerError::ValidationError(_)), "{task_type}");
        }
        let error = client.interrupt("sendEmail", " ", "stop").await.unwrap_err();
        assert!(matches!(error, TaskerError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned_without_retry() {
        let (client, provider) = client();
        client.connect().await.unwrap();
        let broker = provider.as_in_memory().unwrap();
        broker.set_publish_failure(Some("broker unavailable"));

        let error = client
            .enqueue("sendEmail", "inst-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(error, TaskerError::Messaging(MessagingError::Publish { .. })));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let (client, _provider) = client();
        client.connect().await.unwrap();
        client.shutdown();
        assert_eq!(client.state(), ClientState::ShutDown);

        let error = client
            .interrupt("sendEmail", "inst-1", "stop")
            .await
            .unwrap_err();
        assert!(matches!(error, TaskerError::NotConnected));
        assert!(matches!(client.connect().await, Err(TaskerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_closed_provider_maps_to_not_connected() {
        let (client, provider) = client();
        client.connect().await.unwrap();
        provider.close().await.unwrap();

        let error = client
            .enqueue("sendEmail", "inst-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(error, TaskerError::NotConnected));
    }
}
