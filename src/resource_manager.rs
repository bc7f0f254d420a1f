//! Ambient resource manager: idempotent teardown of the long-lived
//! components (C1 stores, C2 bus, C3 breaker registry) on shutdown, and a
//! coarse view of their current footprint for the global error handler's
//! escalation path.

use crate::event_bus::EventBus;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub store_entries: usize,
    pub bus_subscribers: usize,
    pub cleaned_up: bool,
}

/// Tracks a set of `BoundedStore`-like components so they can be released
/// together. Cleanup is idempotent: calling it twice is a no-op the second
/// time.
pub struct ResourceManager {
    bus: Arc<EventBus>,
    cleaned_up: AtomicBool,
    store_sizes: Box<dyn Fn() -> usize + Send + Sync>,
}

impl ResourceManager {
    pub fn new(bus: Arc<EventBus>, store_sizes: Box<dyn Fn() -> usize + Send + Sync>) -> Self {
        Self {
            bus,
            cleaned_up: AtomicBool::new(false),
            store_sizes,
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            store_entries: (self.store_sizes)(),
            bus_subscribers: self.bus.subscriber_count(),
            cleaned_up: self.cleaned_up.load(Ordering::Acquire),
        }
    }

    /// Release the event bus's subscriber table. Safe to call more than
    /// once; only the first call has an effect.
    pub fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    #[test]
    fn cleanup_is_idempotent() {
        let bus = Arc::new(EventBus::new(&BusConfig::default()));
        let manager = ResourceManager::new(bus.clone(), Box::new(|| 0));
        manager.cleanup();
        manager.cleanup();
        assert!(manager.snapshot().cleaned_up);
    }

    #[test]
    fn snapshot_reports_subscriber_count() {
        let bus = Arc::new(EventBus::new(&BusConfig::default()));
        let (_id, _rx) = bus.subscribe("*");
        let manager = ResourceManager::new(bus, Box::new(|| 3));
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.bus_subscribers, 1);
        assert_eq!(snapshot.store_entries, 3);
    }
}
