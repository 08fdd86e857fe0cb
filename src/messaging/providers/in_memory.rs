//! # In-Memory Topic Broker
//!
//! Process-local broker for tests and development.
//!
//! ## Features
//!
//! - **Topic Routing**: bindings match routing keys with AMQP topic semantics (`*`, `#`)
//! - **Settlement**: unacked tracking, requeue with the redelivered flag, dead letters on reject
//! - **Inspection**: published-message log, queue depths and bindings for assertions
//! - **Fault Injection**: publish failures on demand; `close` fails every later call

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info};

use super::spawn_delivery;
use crate::constants::routing;
use crate::messaging::traits::{BrokerAdapter, DeliveryHandler};
use crate::messaging::types::{Delivery, ReceiptHandle, Subscription};
use crate::messaging::MessagingError;
use crate::topology::{Binding, ExchangeDeclaration, ExchangeKind, Topology};

/// Match `routing_key` against a topic binding pattern
///
/// `*` matches exactly one word, `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(routing::WORD_SEPARATOR).collect();
    let key: Vec<&str> = routing_key.split(routing::WORD_SEPARATOR).collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}

/// A message accepted by [`InMemoryMessagingService::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn body_json(&self) -> Result<serde_json::Value, MessagingError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, InMemoryQueue>,
    bindings: BTreeSet<Binding>,
    published: Vec<PublishedMessage>,
    dead_letters: Vec<Delivery>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BrokerState>,
    connected: AtomicBool,
    publish_failure: Mutex<Option<String>>,
    next_delivery_tag: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

/// In-memory broker; clones share the same state
#[derive(Debug, Clone)]
pub struct InMemoryMessagingService {
    inner: Arc<Inner>,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                connected: AtomicBool::new(true),
                publish_failure: Mutex::new(None),
                next_delivery_tag: AtomicU64::new(1),
                shutdown_tx,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Make every publish fail with `reason` until cleared with `None`
    pub fn set_publish_failure(&self, reason: Option<&str>) {
        *self.inner.publish_failure.lock() = reason.map(String::from);
    }

    /// Every message accepted by the broker, in publish order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state.lock().published.clone()
    }

    /// Published messages carrying exactly `routing_key`
    pub fn published_with_key(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.inner
            .state
            .lock()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Deliveries rejected without requeue
    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.inner.state.lock().dead_letters.clone()
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.inner.state.lock().exchanges.contains_key(exchange)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue)
    }

    pub fn bindings(&self) -> BTreeSet<Binding> {
        self.inner.state.lock().bindings.clone()
    }

    /// Messages waiting to be consumed
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::not_connected())
        }
    }

    fn declare_exchange_locked(
        state: &mut BrokerState,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError> {
        match state.exchanges.get(&exchange.name) {
            Some(kind) if *kind != exchange.kind => Err(MessagingError::topology(
                format!("exchange {}", exchange.name),
                format!("already declared as {kind}, requested {}", exchange.kind),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.name.clone(), exchange.kind);
                Ok(())
            }
        }
    }

    /// Move the next ready message on `queue` to unacked
    fn take_next(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.inner.state.lock();
        let queue_state = state.queues.get_mut(queue)?;
        let message = queue_state.ready.pop_front()?;
        let tag = self.inner.next_delivery_tag.fetch_add(1, Ordering::Relaxed);

        let delivery = Delivery {
            queue: queue.to_string(),
            exchange: message.exchange.clone(),
            routing_key: message.routing_key.clone(),
            body: message.body.clone(),
            receipt_handle: ReceiptHandle::from(tag),
            redelivered: message.redelivered,
        };
        queue_state.unacked.insert(tag, message);
        Some(delivery)
    }

    /// Remove a delivery from the unacked set
    fn settle_locked(
        state: &mut BrokerState,
        delivery: &Delivery,
        operation: &str,
    ) -> Result<StoredMessage, MessagingError> {
        let tag = delivery.receipt_handle.as_u64().ok_or_else(|| {
            MessagingError::invalid_receipt_handle(delivery.receipt_handle.as_str())
        })?;
        let queue = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| MessagingError::queue_not_found(&delivery.queue))?;
        queue.unacked.remove(&tag).ok_or_else(|| {
            let message = "unknown or already settled delivery";
            if operation == "ack" {
                MessagingError::ack(&delivery.queue, &delivery.receipt_handle, message)
            } else {
                MessagingError::nack(&delivery.queue, &delivery.receipt_handle, message)
            }
        })
    }

    async fn consume(
        self,
        queue: String,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
        notify: Arc<Notify>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut broker_shutdown_rx = self.inner.shutdown_tx.subscribe();
        let semaphore = Arc::new(Semaphore::new(usize::from(concurrency)));

        'consume: loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                _ = broker_shutdown_rx.wait_for(|stop| *stop) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = loop {
                if let Some(delivery) = self.take_next(&queue) {
                    break delivery;
                }
                tokio::select! {
                    biased;
                    _ = shutdown_rx.wait_for(|stop| *stop) => break 'consume,
                    _ = broker_shutdown_rx.wait_for(|stop| *stop) => break 'consume,
                    _ = notify.notified() => {}
                }
            };

            debug!(
                queue = %queue,
                routing_key = %delivery.routing_key,
                receipt = %delivery.receipt_handle,
                "Delivering message"
            );
            spawn_delivery(self.clone(), Arc::clone(&handler), delivery, permit);
        }

        // wait for in-flight handlers to settle
        let _ = semaphore.acquire_many(u32::from(concurrency)).await;
        debug!(queue = %queue, "In-memory consumer stopped");
    }
}

#[async_trait]
impl BrokerAdapter for InMemoryMessagingService {
    fn provider_name(&self) -> &'static str {
        "in_memory"
    }

    async fn declare_exchange(
        &self,
        exchange: &ExchangeDeclaration,
    ) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock();
        Self::declare_exchange_locked(&mut state, exchange)
    }

    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock();

        Self::declare_exchange_locked(&mut state, &topology.exchange)?;
        for queue in topology.queues() {
            state.queues.entry(queue.name.clone()).or_default();
        }
        for binding in &topology.bindings {
            state.bindings.insert(binding.clone());
        }

        info!(
            exchange = %topology.exchange.name,
            bindings = topology.bindings.len(),
            "In-memory topology declared"
        );
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        if let Some(reason) = self.inner.publish_failure.lock().clone() {
            return Err(MessagingError::publish(exchange, routing_key, reason));
        }

        let mut state = self.inner.state.lock();
        if !state.exchanges.contains_key(exchange) {
            return Err(MessagingError::exchange_not_found(exchange));
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        });

        // a queue receives one copy no matter how many of its bindings match
        let targets: BTreeSet<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.routing_key, routing_key))
            .map(|b| b.queue.clone())
            .collect();

        for target in &targets {
            if let Some(queue) = state.queues.get_mut(target) {
                queue.ready.push_back(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                    redelivered: false,
                });
                queue.notify.notify_one();
            }
        }

        if targets.is_empty() {
            debug!(
                exchange = %exchange,
                routing_key = %routing_key,
                "Message unroutable; discarded"
            );
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        concurrency: u16,
    ) -> Result<Subscription, MessagingError> {
        self.ensure_connected()?;
        if concurrency == 0 {
            return Err(MessagingError::subscribe(queue, "concurrency must be at least 1"));
        }

        let notify = {
            let state = self.inner.state.lock();
            let queue_state = state
                .queues
                .get(queue)
                .ok_or_else(|| MessagingError::queue_not_found(queue))?;
            Arc::clone(&queue_state.notify)
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().consume(
            queue.to_string(),
            handler,
            concurrency,
            notify,
            shutdown_rx,
        ));

        info!(queue = %queue, concurrency = concurrency, "In-memory consumer started");
        Ok(Subscription::new(queue, shutdown_tx, handle))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock();
        Self::settle_locked(&mut state, delivery, "ack")?;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock();
        let mut message = Self::settle_locked(&mut state, delivery, "nack")?;

        if requeue {
            message.redelivered = true;
            if let Some(queue) = state.queues.get_mut(&delivery.queue) {
                queue.ready.push_front(message);
                queue.notify.notify_one();
            }
        } else {
            state.dead_letters.push(delivery.clone());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(self.is_connected())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            self.inner.shutdown_tx.send_replace(true);
            info!("In-memory broker closed");
        }
        Ok(())
    }
}
