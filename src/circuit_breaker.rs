//! C3 — Circuit Breaker.
//!
//! Three-state breaker (closed/open/half-open) keyed by a generic resource
//! name, wired to publish `circuit.state.changed` onto the event bus on
//! every state transition rather than only returning a typed error.

use crate::event_bus::EventBus;
use crate::types::error::CircuitError;
use crate::types::event::{event_type, Event};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    /// Failures older than this are pruned before counting toward
    /// `failure_threshold` — a rolling window, not a lifetime tally.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
            monitoring_period: Duration::from_secs(60),
        }
    }
}

/// Single resource's breaker state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: std::collections::VecDeque<Instant>,
    half_open_calls: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: std::collections::VecDeque::new(),
            half_open_calls: 0,
        }
    }

    /// Drop failures that have aged out of `monitoring_period`. Called at
    /// the start of `record_failure` so the threshold check and the prune
    /// happen as one step.
    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > self.config.monitoring_period {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit or reject a call for `resource`. Transitions `Open -> HalfOpen`
    /// once the recovery timeout has elapsed.
    pub fn check(&mut self, resource: &str) -> Result<(), CircuitError> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 0;
                    Ok(())
                } else {
                    Err(CircuitError::Open {
                        resource: resource.to_string(),
                        recovery_remaining_ms: (self.config.recovery_timeout - elapsed)
                            .as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls >= self.config.half_open_max_calls {
                    Err(CircuitError::Open {
                        resource: resource.to_string(),
                        recovery_remaining_ms: 0,
                    })
                } else {
                    self.half_open_calls += 1;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failures.clear();
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.failures.push_back(now);
        self.prune(now);
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open { opened_at: now };
            }
            CircuitState::Closed if self.failures.len() as u32 >= self.config.failure_threshold => {
                self.state = CircuitState::Open { opened_at: now };
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.len() as u32
    }
}

/// Per-resource registry shared across the dispatcher and provider chain.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    config: CircuitBreakerConfig,
    bus: EventBus,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, bus: EventBus) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            bus,
        }
    }

    pub async fn check(&self, resource: &str) -> Result<(), CircuitError> {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(resource.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        let before = breaker.state();
        let result = breaker.check(resource);
        self.emit_on_transition(resource, before, breaker.state());
        if let Err(CircuitError::Open { recovery_remaining_ms, .. }) = &result {
            if *recovery_remaining_ms > 0 {
                warn!(resource, "circuit open, call rejected");
            }
        }
        result
    }

    pub async fn record_success(&self, resource: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(resource) {
            let before = breaker.state();
            breaker.record_success();
            self.emit_on_transition(resource, before, breaker.state());
        }
    }

    pub async fn record_failure(&self, resource: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(resource.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        let before = breaker.state();
        breaker.record_failure();
        self.emit_on_transition(resource, before, breaker.state());
    }

    pub async fn get_state(&self, resource: &str) -> Option<CircuitState> {
        self.breakers.read().await.get(resource).map(|b| b.state())
    }

    fn emit_on_transition(&self, resource: &str, before: CircuitState, after: CircuitState) {
        if std::mem::discriminant(&before) == std::mem::discriminant(&after) {
            return;
        }
        info!(resource, ?before, ?after, "circuit breaker state changed");
        let _ = self.bus.publish(Event::new(
            event_type::CIRCUIT_STATE_CHANGED,
            "circuit_breaker",
            None,
            serde_json::json!({ "resource": resource, "state": format!("{after:?}") }),
        ));
    }
}
