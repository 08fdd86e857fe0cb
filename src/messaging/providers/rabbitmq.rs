//! # RabbitMQ Broker
//!
//! AMQP 0.9.1 implementation of [`BrokerAdapter`] using the `lapin` crate.
//!
//! ## Channels
//!
//! | Channel | Purpose |
//! |---------|---------|
//! | publish | `basic_publish`, in confirm mode when `publisher_confirms` is set |
//! | declaration | short-lived, one per `declare_*` call; a failed declare closes only it |
//! | consumer | one per subscribed queue, prefetch = queue concurrency |
//!
//! Delivery tags are channel-scoped, so acks and rejects are routed to the
//! consumer channel of the delivery's queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::spawn_delivery;
use crate::config::BrokerConfig;
use crate::constants::content;
use crate::messaging::traits::{BrokerAdapter, DeliveryHandler};
use crate::messaging::types::{Delivery, ReceiptHandle, Subscription};
use crate::messaging::MessagingError;
use crate::topology::{ExchangeDeclaration, ExchangeKind, Topology};

/// Persistent delivery mode
const DELIVERY_MODE_PERSISTENT: u8 = 2;

#[derive(Debug)]
struct Inner {
    connection: Connection,
    publish_channel: Channel,
    /// Consumer channel per subscribed queue
    consumer_channels: DashMap<String, Channel>,
    config: BrokerConfig,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// RabbitMQ-backed broker adapter; clones share one connection
#[derive(Debug, Clone)]
pub struct RabbitMqMessagingService {
    inner: Arc<Inner>,
}

impl RabbitMqMessagingService {
    /// Connect to the broker described by `config`
    pub async fn connect(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(config.connection_name.clone().into());

        let connection = tokio::time::timeout(
            config.connection_timeout(),
            Connection::connect(&config.url, properties),
        )
        .await
        .map_err(|_| {
            MessagingError::timeout(
                "rabbitmq connect",
                u64::from(config.connection_timeout_seconds),
            )
        })?
        .map_err(|e| {
            MessagingError::connection(format!(
                "RabbitMQ connection to {} failed: {e}",
                config.redacted_url()
            ))
        })?;

        let publish_channel = connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        if config.publisher_confirms {
            publish_channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| {
                    MessagingError::configuration(
                        "rabbitmq",
                        format!("Failed to enable publisher confirms: {e}"),
                    )
                })?;
        }

        info!(
            url = %config.redacted_url(),
            connection_name = %config.connection_name,
            publisher_confirms = config.publisher_confirms,
            "Connected to RabbitMQ"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                publish_channel,
                consumer_channels: DashMap::new(),
                config: config.clone(),
                closed: AtomicBool::new(false),
                shutdown_tx,
            }),
        })
    }

    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.inner.closed.load(Ordering::Acquire) || !self.inner.connection.status().connected()
        {
            Err(MessagingError::not_connected())
        } else {
            Ok(())
        }
    }

    async fn declaration_channel(&self) -> Result<Channel, MessagingError> {
        self.ensure_open()?;
        self.inner
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::topology("channel", e.to_string()))
    }

    async fn declare_exchange_on(
        channel: &Channel,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError> {
        let kind = match exchange.kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        };

        channel
            .exchange_declare(
                &exchange.name,
                kind,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::topology(format!("exchange {}", exchange.name), e.to_string())
            })
    }

    async fn close_channel(channel: &Channel, purpose: &str) {
        if let Err(e) = channel.close(200, "OK").await {
            debug!(purpose = %purpose, error = %e, "Channel close failed");
        }
    }

    /// Channel that received deliveries for `queue`
    fn consumer_channel(&self, queue: &str) -> Result<Channel, MessagingError> {
        self.inner
            .consumer_channels
            .get(queue)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MessagingError::subscribe(queue, "no active consumer channel"))
    }

    fn delivery_tag(delivery: &Delivery) -> Result<u64, MessagingError> {
        delivery.receipt_handle.as_u64().ok_or_else(|| {
            MessagingError::invalid_receipt_handle(delivery.receipt_handle.as_str())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume(
        self,
        queue: String,
        consumer_tag: String,
        mut consumer: Consumer,
        channel: Channel,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut broker_shutdown_rx = self.inner.shutdown_tx.subscribe();
        let semaphore = Arc::new(Semaphore::new(usize::from(concurrency)));

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                _ = broker_shutdown_rx.wait_for(|stop| *stop) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                _ = broker_shutdown_rx.wait_for(|stop| *stop) => break,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(mut amqp_delivery)) => Delivery {
                    queue: queue.clone(),
                    exchange: amqp_delivery.exchange.as_str().to_string(),
                    routing_key: amqp_delivery.routing_key.as_str().to_string(),
                    body: std::mem::take(&mut amqp_delivery.data),
                    receipt_handle: ReceiptHandle::from(amqp_delivery.delivery_tag),
                    redelivered: amqp_delivery.redelivered,
                },
                Some(Err(e)) => {
                    warn!(queue = %queue, error = %e, "RabbitMQ consumer stream failed");
                    break;
                }
                None => {
                    info!(queue = %queue, "RabbitMQ consumer cancelled by broker");
                    break;
                }
            };

            spawn_delivery(self.clone(), Arc::clone(&handler), delivery, permit);
        }

        if let Err(e) = channel
            .basic_cancel(&consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(queue = %queue, error = %e, "basic_cancel failed");
        }

        // in-flight handlers still need the channel to settle
        let _ = semaphore.acquire_many(u32::from(concurrency)).await;

        self.inner.consumer_channels.remove(&queue);
        Self::close_channel(&channel, "consumer").await;
        info!(queue = %queue, consumer_tag = %consumer_tag, "RabbitMQ consumer stopped");
    }
}

#[async_trait]
impl BrokerAdapter for RabbitMqMessagingService {
    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }

    async fn declare_exchange(
        &self,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError> {
        let channel = self.declaration_channel().await?;
        let result = Self::declare_exchange_on(&channel, exchange).await;
        Self::close_channel(&channel, "declaration").await;
        result
    }

    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        let channel = self.declaration_channel().await?;

        let result = async {
            Self::declare_exchange_on(&channel, &topology.exchange).await?;

            for queue in topology.queues() {
                channel
                    .queue_declare(
                        &queue.name,
                        QueueDeclareOptions {
                            durable: queue.durable,
                            auto_delete: queue.auto_delete,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        MessagingError::topology(format!("queue {}", queue.name), e.to_string())
                    })?;
            }

            for binding in &topology.bindings {
                channel
                    .queue_bind(
                        &binding.queue,
                        &binding.exchange,
                        &binding.routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        MessagingError::topology(
                            format!("binding {} -> {}", binding.routing_key, binding.queue),
                            e.to_string(),
                        )
                    })?;
            }

            Ok::<(), MessagingError>(())
        }
        .await;

        Self::close_channel(&channel, "declaration").await;
        result
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), MessagingError> {
        self.ensure_open()?;

        let confirm = self
            .inner
            .publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
                    .with_content_type(content::JSON.into()),
            )
            .await
            .map_err(|e| MessagingError::publish(exchange, routing_key, e.to_string()))?;

        let confirmation = confirm.await.map_err(|e| {
            MessagingError::publish(exchange, routing_key, format!("confirmation failed: {e}"))
        })?;

        if confirmation.is_nack() {
            return Err(MessagingError::publish(
                exchange,
                routing_key,
                "broker rejected the message",
            ));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
    ) -> Result<Subscription, MessagingError> {
        self.ensure_open()?;
        if concurrency == 0 {
            return Err(MessagingError::subscribe(queue, "concurrency must be at least 1"));
        }
        if self.inner.consumer_channels.contains_key(queue) {
            return Err(MessagingError::subscribe(queue, "queue is already being consumed"));
        }

        let channel = self
            .inner
            .connection
            .create_channel()
            .await
            .map_err(|e| {
                MessagingError::subscribe(queue, format!("channel creation failed: {e}"))
            })?;

        channel
            .basic_qos(concurrency, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::subscribe(queue, format!("failed to set QoS: {e}")))?;

        let consumer_tag = format!(
            "{}-{}-{}",
            self.inner.config.connection_name,
            queue,
            Uuid::new_v4().simple()
        );
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::subscribe(queue, format!("basic_consume failed: {e}")))?;

        self.inner
            .consumer_channels
            .insert(queue.to_string(), channel.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().consume(
            queue.to_string(),
            consumer_tag.clone(),
            consumer,
            channel,
            handler,
            concurrency,
            shutdown_rx,
        ));

        info!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            prefetch = concurrency,
            "RabbitMQ consumer started"
        );
        Ok(Subscription::new(queue, shutdown_tx, handle))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        let tag = Self::delivery_tag(delivery)?;
        let channel = self.consumer_channel(&delivery.queue)?;

        channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::ack(&delivery.queue, tag, format!("ack failed: {e}")))
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError> {
        let tag = Self::delivery_tag(delivery)?;
        let channel = self.consumer_channel(&delivery.queue)?;

        channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::nack(&delivery.queue, tag, format!("nack failed: {e}")))
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(!self.inner.closed.load(Ordering::Acquire)
            && self.inner.connection.status().connected()
            && self.inner.publish_channel.status().connected())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown_tx.send_replace(true);

        self.inner
            .connection
            .close(200, "OK")
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ close failed: {e}")))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }
}
