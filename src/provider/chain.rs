//! Ordered fallback chain (§4.4 Chain contract).

use super::{clamp_max_tokens, GenerateOptions, InferenceProvider, MemoryStatus, ProviderResult, ThermalStatus};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::ProviderChainConfig;
use crate::event_bus::EventBus;
use crate::store::RateLimiter;
use crate::types::error::ProviderError;
use crate::types::event::{event_type, Event};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Tries providers in the order given, enforcing: circuit-open skip,
/// per-provider rate limiting, thermal/memory gating, per-provider timeout,
/// retryable-error retry with exponential jittered backoff, and
/// fallback-with-event on exhaustion.
///
/// Invariant: at most one provider call is in flight per `generate`
/// invocation, and providers are never reordered within one call.
pub struct FallbackChain {
    providers: Vec<Arc<dyn InferenceProvider>>,
    breakers: Arc<CircuitBreakerRegistry>,
    bus: EventBus,
    config: ProviderChainConfig,
    rate_limiter: Arc<RateLimiter>,
    in_flight: AtomicUsize,
}

/// Decrements the global in-flight counter when a `generate` call ends,
/// success or failure alike.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl FallbackChain {
    pub fn new(
        providers: Vec<Arc<dyn InferenceProvider>>,
        breakers: Arc<CircuitBreakerRegistry>,
        bus: EventBus,
        config: ProviderChainConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            providers,
            breakers,
            bus,
            config,
            rate_limiter,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        mut opts: GenerateOptions,
    ) -> Result<ProviderResult, ProviderError> {
        opts.max_tokens = clamp_max_tokens(opts.max_tokens, self.config.max_tokens_ceiling);

        let in_flight_before = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if in_flight_before >= self.config.global_in_flight_cap {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(ProviderError::Busy);
        }
        let _in_flight_guard = InFlightGuard(&self.in_flight);

        let mut last_reason = "no providers configured".to_string();

        for (idx, provider) in self.providers.iter().enumerate() {
            let resource = provider.name();

            if self.rate_limiter.allow(resource).is_err() {
                last_reason = format!("{resource}: rate limited");
                self.emit_fallback(resource, &last_reason, self.next_name(idx));
                continue;
            }

            if self.breakers.check(resource).await.is_err() {
                last_reason = format!("{resource}: circuit open");
                self.emit_fallback(resource, &last_reason, self.next_name(idx));
                continue;
            }

            if provider.thermal_status().await == ThermalStatus::Critical
                || provider.memory_status().await == MemoryStatus::Critical
            {
                last_reason = format!("{resource}: thermal/memory critical");
                self.emit_fallback(resource, &last_reason, self.next_name(idx));
                continue;
            }

            match self.call_with_retry(provider.as_ref(), prompt, &opts).await {
                Ok(result) => {
                    self.breakers.record_success(resource).await;
                    let _ = self.bus.publish(Event::new(
                        event_type::PROVIDER_SUCCESS,
                        "fallback_chain",
                        None,
                        serde_json::json!({ "provider": resource }),
                    ));
                    return Ok(result);
                }
                Err(err) => {
                    self.breakers.record_failure(resource).await;
                    last_reason = err.to_string();
                    self.emit_fallback(resource, &last_reason, self.next_name(idx));
                }
            }
        }

        warn!(reason = %last_reason, "provider chain exhausted");
        Err(ProviderError::Unavailable(last_reason))
    }

    async fn call_with_retry(
        &self,
        provider: &dyn InferenceProvider,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<ProviderResult, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let call = provider.generate(prompt, opts);
            let outcome = tokio::time::timeout(Duration::from_millis(opts.timeout_ms), call).await;

            let err = match outcome {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(err)) => err,
                Err(_) => ProviderError::Timeout,
            };

            if !err.is_retryable() || attempt >= self.config.retry_attempts {
                return Err(err);
            }
            attempt += 1;
            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = base.min(self.config.backoff_cap_ms);
        let jitter = capped / 4;
        let jittered = capped.saturating_sub(jitter / 2)
            + (jitter as f64 * rand_jitter_fraction()) as u64;
        Duration::from_millis(jittered)
    }

    fn next_name(&self, idx: usize) -> Option<&str> {
        self.providers.get(idx + 1).map(|p| p.name())
    }

    fn emit_fallback(&self, failed: &str, reason: &str, next: Option<&str>) {
        let _ = self.bus.publish(Event::new(
            event_type::PROVIDER_FALLBACK,
            "fallback_chain",
            None,
            serde_json::json!({
                "failedProvider": failed,
                "reason": reason,
                "nextProvider": next,
            }),
        ));
    }
}

/// Deterministic-enough jitter without depending on a seeded RNG argument
/// at every call site; callers needing reproducibility inject their own
/// provider with fixed responses instead of relying on backoff timing.
fn rand_jitter_fraction() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}
