//! Performance benchmarks verifying documented performance claims.
//!
//! Claims under test:
//!   1. `BoundedStore` set/get sustains sub-millisecond operations even
//!      under LRU eviction pressure.
//!   2. `CircuitBreakerRegistry::check` overhead stays negligible on the
//!      closed-circuit hot path.
//!   3. `EventBus::publish` fan-out to many subscribers stays bounded as
//!      subscriber count grows.

use agentmesh_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use agentmesh_core::config::{BusConfig, StoreConfig};
use agentmesh_core::event_bus::EventBus;
use agentmesh_core::store::{BoundedStore, EvictionPolicy};
use agentmesh_core::types::event::Event;
use criterion::{criterion_group, criterion_main, Criterion};

// ═══════════════════════════════════════════════════════════════════════════
// Claim 1: BoundedStore set/get under LRU pressure
// ═══════════════════════════════════════════════════════════════════════════

fn bench_store_set_get(c: &mut Criterion) {
    let config = StoreConfig {
        max_size: 1_000,
        default_ttl: None,
    };
    let store: BoundedStore<u64, u64> = BoundedStore::new(EvictionPolicy::Lru, &config);
    let mut n = 0u64;

    c.bench_function("claim1: bounded_store_set_get", |b| {
        b.iter(|| {
            n += 1;
            let key = n % 2_000;
            store.set(key, n).unwrap();
            store.get(&key);
        });
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// Claim 2: circuit breaker closed-path overhead
// ═══════════════════════════════════════════════════════════════════════════

fn bench_circuit_breaker_closed_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = EventBus::new(&BusConfig::default());
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), bus);

    c.bench_function("claim2: circuit_breaker_check_closed", |b| {
        b.to_async(&rt).iter(|| async {
            registry.check("resource").await.unwrap();
            registry.record_success("resource").await;
        });
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// Claim 3: event bus fan-out
// ═══════════════════════════════════════════════════════════════════════════

fn bench_event_bus_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = EventBus::new(&BusConfig {
        per_subscriber_capacity: 4096,
    });
    let mut receivers = Vec::new();
    for _ in 0..50 {
        let (_id, rx) = bus.subscribe("bench.*");
        receivers.push(rx);
    }

    c.bench_function("claim3: event_bus_publish_50_subscribers", |b| {
        b.to_async(&rt).iter(|| {
            let bus = &bus;
            async move {
                bus.publish(Event::new(
                    "bench.tick",
                    "bench",
                    None,
                    serde_json::json!({}),
                ))
                .unwrap();
            }
        });
    });
}

criterion_group! {
    name = store;
    config = Criterion::default().sample_size(100);
    targets = bench_store_set_get,
}

criterion_group! {
    name = circuit_breaker;
    config = Criterion::default().sample_size(100);
    targets = bench_circuit_breaker_closed_path,
}

criterion_group! {
    name = event_bus;
    config = Criterion::default().sample_size(50);
    targets = bench_event_bus_fanout,
}

criterion_main!(store, circuit_breaker, event_bus);
