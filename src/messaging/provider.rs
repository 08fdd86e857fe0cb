//! # Messaging Provider Enum
//!
//! Enum dispatch over the broker providers, avoiding trait-object indirection
//! on the publish and settle hot paths. Components hold an
//! `Arc<MessagingProvider>` constructed once at startup; there is no global
//! broker handle.

use std::sync::Arc;

use async_trait::async_trait;

use super::providers::{InMemoryMessagingService, RabbitMqMessagingService};
use super::traits::{BrokerAdapter, DeliveryHandler};
use super::types::{Delivery, Subscription};
use super::MessagingError;
use crate::config::{BrokerBackend, BrokerConfig};
use crate::topology::{ExchangeDeclaration, Topology};

#[derive(Debug, Clone)]
pub enum MessagingProvider {
    /// RabbitMQ via `lapin`
    RabbitMq(RabbitMqMessagingService),

    /// Process-local broker for tests and development
    InMemory(InMemoryMessagingService),
}

impl MessagingProvider {
    /// Connect the backend selected in `config`
    pub async fn connect(config: &BrokerConfig) -> Result<Self, MessagingError> {
        match config.backend {
            BrokerBackend::RabbitMq => Ok(Self::RabbitMq(
                RabbitMqMessagingService::connect(config).await?,
            )),
            BrokerBackend::InMemory => Ok(Self::new_in_memory()),
        }
    }

    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryMessagingService::new())
    }

    /// The in-memory broker, for inspection in tests
    pub fn as_in_memory(&self) -> Option<&InMemoryMessagingService> {
        match self {
            Self::InMemory(s) => Some(s),
            Self::RabbitMq(_) => None,
        }
    }
}

impl From<InMemoryMessagingService> for MessagingProvider {
    fn from(service: InMemoryMessagingService) -> Self {
        Self::InMemory(service)
    }
}

impl From<RabbitMqMessagingService> for MessagingProvider {
    fn from(service: RabbitMqMessagingService) -> Self {
        Self::RabbitMq(service)
    }
}

#[async_trait]
impl BrokerAdapter for MessagingProvider {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    async fn declare_exchange(
        &self,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.declare_exchange(exchange).await,
            Self::InMemory(s) => s.declare_exchange(exchange).await,
        }
    }

    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.declare_topology(topology).await,
            Self::InMemory(s) => s.declare_topology(topology).await,
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.publish(exchange, routing_key, body).await,
            Self::InMemory(s) => s.publish(exchange, routing_key, body).await,
        }
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
    ) -> Result<Subscription, MessagingError> {
        match self {
            Self::RabbitMq(s) => s.subscribe(queue, handler, concurrency).await,
            Self::InMemory(s) => s.subscribe(queue, handler, concurrency).await,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.ack(delivery).await,
            Self::InMemory(s) => s.ack(delivery).await,
        }
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.reject(delivery, requeue).await,
            Self::InMemory(s) => s.reject(delivery, requeue).await,
        }
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::RabbitMq(s) => s.health_check().await,
            Self::InMemory(s) => s.health_check().await,
        }
    }

    async fn close(&self) -> Result<(), MessagingError> {
        match self {
            Self::RabbitMq(s) => s.close().await,
            Self::InMemory(s) => s.close().await,
        }
    }
}
