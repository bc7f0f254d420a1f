//! C2 — Event Bus.
//!
//! A topic-pattern pub/sub bus over the canonical `Event` envelope. Each
//! subscriber's mailbox is a bounded ring buffer the bus itself owns, so a
//! full mailbox evicts the oldest queued event before the incoming one is
//! pushed, rather than blocking or dropping the publisher's event.

use crate::config::BusConfig;
use crate::types::error::BusError;
use crate::types::event::Event;
use crate::types::ids::SubscriptionId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A live subscription: a topic pattern (`"provider.*"`, `"*"`, or an exact
/// topic) and the bounded ring buffer its receiver drains.
struct Subscriber {
    pattern: String,
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    dropped: AtomicU64,
}

fn matches_pattern(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic == prefix || topic.starts_with(&format!("{prefix}."));
    }
    pattern == topic
}

/// In-process event bus (C2). Cloning is cheap; all clones share the same
/// subscriber table.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<DashMap<SubscriptionId, Arc<Subscriber>>>,
    capacity: usize,
    shutting_down: Arc<AtomicBool>,
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            capacity: config.per_subscriber_capacity,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish `event` to every subscriber whose pattern matches its type.
    /// A full mailbox evicts the oldest queued event before the incoming
    /// one is appended, incrementing that subscriber's `dropped` counter.
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(BusError::ShuttingDown);
        }
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if !matches_pattern(&sub.pattern, &event.event_type) {
                continue;
            }
            let mut queue = sub.queue.lock();
            if queue.len() >= sub.capacity {
                queue.pop_front();
                sub.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %event.event_type, "event bus mailbox full, dropped oldest queued event");
            }
            queue.push_back(event.clone());
            drop(queue);
            sub.notify.notify_one();
        }
        Ok(())
    }

    /// Subscribe to a topic pattern, returning the id and a receiving end
    /// the caller drains (directly, or via `spawn_handler`).
    pub fn subscribe(&self, pattern: impl Into<String>) -> (SubscriptionId, Receiver) {
        let id = SubscriptionId::new();
        let notify = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(Subscriber {
            pattern: pattern.into(),
            queue: Mutex::new(VecDeque::with_capacity(self.capacity.min(64))),
            capacity: self.capacity,
            notify: notify.clone(),
            closed: closed.clone(),
            dropped: AtomicU64::new(0),
        });
        self.subscribers.insert(id, subscriber.clone());
        (
            id,
            Receiver {
                subscriber,
                notify,
                closed,
            },
        )
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, sub)) => {
                sub.closed.store(true, Ordering::Release);
                sub.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Spawn a background task draining `rx` through `handler`. A handler
    /// error or panic is caught and re-published as `bus.handler.failed`
    /// rather than taking down the worker task.
    pub fn spawn_handler<F>(&self, mut rx: Receiver, mut handler: F)
    where
        F: FnMut(Event) -> Result<(), String> + Send + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(event)
                }));
                let reason = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(reason)) => reason,
                    Err(_) => "handler panicked".to_string(),
                };
                let _ = bus.publish(Event::new(
                    crate::types::event::event_type::BUS_HANDLER_FAILED,
                    "event_bus",
                    None,
                    serde_json::json!({ "reason": reason }),
                ));
            }
        });
    }

    pub fn dropped_for(&self, id: SubscriptionId) -> u64 {
        self.subscribers
            .get(&id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        for entry in self.subscribers.iter() {
            entry.value().closed.store(true, Ordering::Release);
            entry.value().notify.notify_waiters();
        }
        self.subscribers.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRecvError;

/// The receiving end of a subscription's ring-buffer mailbox.
pub struct Receiver {
    subscriber: Arc<Subscriber>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl Receiver {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.subscriber.queue.lock().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.subscriber.queue.lock().pop_front().ok_or(TryRecvError)
    }
}
