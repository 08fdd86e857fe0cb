//! # Interrupt Tracking
//!
//! Interrupts are level-triggered: once raised for an instance, the signal
//! stays raised for the lifetime of that instance's handler, and raising it
//! again changes nothing.
//!
//! An interrupt may arrive before its task starts (publishers are not ordered
//! across queues). What happens then is the configured policy:
//!
//! - `buffer`: keep it for the grace window; a task for the same instance that
//!   starts inside the window sees its signal already raised
//! - `drop`: discard it
//!
//! Active and pending entries are always touched in the same order (active
//! shard first, then pending) so a concurrent `begin` and `raise` cannot both
//! miss each other.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{InterruptConfig, InterruptPolicyKind};

type InstanceKey = (String, String);

/// Why and when an instance was interrupted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterruptNotice {
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

/// A handler's view of its instance's interrupt state
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    rx: watch::Receiver<Option<InterruptNotice>>,
}

impl InterruptSignal {
    /// A signal that is never raised, for invoking handlers outside a worker
    pub fn detached() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn is_interrupted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn notice(&self) -> Option<InterruptNotice> {
        self.rx.borrow().clone()
    }

    /// Wait until the instance is interrupted
    ///
    /// Returns `None` if the signal can no longer be raised (the tracker
    /// released the instance, or the signal is detached).
    pub async fn interrupted(&mut self) -> Option<InterruptNotice> {
        self.rx.wait_for(Option::is_some).await.ok()?.clone()
    }
}

/// What happened to a raised interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptDisposition {
    /// The instance is running; its signal is raised
    Delivered,
    /// No running instance; held for the grace window
    Buffered,
    /// No running instance; discarded
    Dropped,
}

impl fmt::Display for InterruptDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Buffered => write!(f, "buffered"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

#[derive(Debug)]
struct ActiveEntry {
    sender: watch::Sender<Option<InterruptNotice>>,
    /// Handlers currently running for this instance (redeliveries can overlap)
    holders: usize,
}

#[derive(Debug)]
struct PendingInterrupt {
    notice: InterruptNotice,
    expires_at: Instant,
}

/// Process-wide interrupt state keyed by `(task type, instance id)`
#[derive(Debug)]
pub struct InterruptTracker {
    policy: InterruptPolicyKind,
    grace_window: Duration,
    active: DashMap<InstanceKey, ActiveEntry>,
    pending: DashMap<InstanceKey, PendingInterrupt>,
}

impl InterruptTracker {
    pub fn new(policy: InterruptPolicyKind, grace_window: Duration) -> Self {
        Self {
            policy,
            grace_window,
            active: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    pub fn from_config(config: &InterruptConfig) -> Self {
        Self::new(config.policy, config.grace_window())
    }

    pub fn policy(&self) -> InterruptPolicyKind {
        self.policy
    }

    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Instances with a running handler
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Buffered interrupts still inside their grace window
    pub fn pending_count(&self) -> usize {
        self.purge_expired();
        self.pending.len()
    }

    /// Mark an instance as running and hand out its signal
    ///
    /// A buffered interrupt for the instance that has not expired is applied
    /// immediately. The instance stays tracked until the returned guard drops.
    pub fn begin(self: &Arc<Self>, task_type: &str, instance_id: &str) -> ActiveTask {
        self.purge_expired();
        let key = (task_type.to_string(), instance_id.to_string());

        let signal = {
            let mut entry = self.active.entry(key.clone()).or_insert_with(|| ActiveEntry {
                sender: watch::channel(None).0,
                holders: 0,
            });
            entry.holders += 1;

            if let Some((_, pending)) = self.pending.remove(&key) {
                if pending.expires_at > Instant::now() {
                    debug!(
                        task_type = %task_type,
                        instance_id = %instance_id,
                        reason = %pending.notice.reason,
                        "Applying buffered interrupt to starting task"
                    );
                    entry.sender.send_replace(Some(pending.notice));
                }
            }

            InterruptSignal {
                rx: entry.sender.subscribe(),
            }
        };

        ActiveTask {
            tracker: Arc::clone(self),
            key,
            signal,
        }
    }

    /// Raise the interrupt for an instance
    pub fn raise(
        &self,
        task_type: &str,
        instance_id: &str,
        reason: &str,
    ) -> InterruptDisposition {
        self.purge_expired();
        let key = (task_type.to_string(), instance_id.to_string());
        let notice = InterruptNotice {
            reason: reason.to_string(),
            received_at: Utc::now(),
        };

        match self.active.entry(key) {
            Entry::Occupied(entry) => {
                let raised = entry.get().sender.send_if_modified(|current| {
                    if current.is_some() {
                        return false;
                    }
                    *current = Some(notice);
                    true
                });
                info!(
                    task_type = %task_type,
                    instance_id = %instance_id,
                    reason = %reason,
                    already_raised = !raised,
                    "Interrupt delivered to running task"
                );
                InterruptDisposition::Delivered
            }
            Entry::Vacant(vacant) => {
                if self.policy == InterruptPolicyKind::Drop || self.grace_window.is_zero() {
                    info!(
                        task_type = %task_type,
                        instance_id = %instance_id,
                        reason = %reason,
                        "Interrupt for task that is not running; dropped"
                    );
                    return InterruptDisposition::Dropped;
                }

                let now = Instant::now();
                let pending = PendingInterrupt {
                    notice,
                    expires_at: now + self.grace_window,
                };
                // first reason wins while buffered, matching a running task
                match self.pending.entry(vacant.key().clone()) {
                    Entry::Occupied(mut existing) if existing.get().expires_at <= now => {
                        existing.insert(pending);
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(pending);
                    }
                }
                info!(
                    task_type = %task_type,
                    instance_id = %instance_id,
                    reason = %reason,
                    grace_window_ms = self.grace_window.as_millis() as u64,
                    "Interrupt for task that is not running; buffered"
                );
                InterruptDisposition::Buffered
            }
        }
    }

    /// Whether an instance currently has a raised signal or a buffered interrupt
    pub fn is_interrupted(&self, task_type: &str, instance_id: &str) -> bool {
        let key = (task_type.to_string(), instance_id.to_string());
        if let Some(entry) = self.active.get(&key) {
            return entry.sender.borrow().is_some();
        }
        self.pending
            .get(&key)
            .is_some_and(|pending| pending.expires_at > Instant::now())
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.pending.retain(|_, pending| pending.expires_at > now);
    }

    fn release(&self, key: &InstanceKey) {
        if let Entry::Occupied(mut entry) = self.active.entry(key.clone()) {
            let holders = &mut entry.get_mut().holders;
            *holders = holders.saturating_sub(1);
            if *holders == 0 {
                entry.remove();
            }
        }
    }
}

/// Guard for a running instance; releases the instance when dropped
#[derive(Debug)]
pub struct ActiveTask {
    tracker: Arc<InterruptTracker>,
    key: InstanceKey,
    signal: InterruptSignal,
}

impl ActiveTask {
    pub fn signal(&self) -> InterruptSignal {
        self.signal.clone()
    }

    pub fn task_type(&self) -> &str {
        &self.key.0
    }

    pub fn instance_id(&self) -> &str {
        &self.key.1
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.tracker.release(&self.key);
    }
}
