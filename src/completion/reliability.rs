use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::completion::{
    error::{GatewayError, GatewayErrorKind},
    types::{BackendId, ReliabilityConfig},
};

/// How often and how patiently a failed attempt is resent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms.max(1)),
            cap: Duration::from_millis(config.backoff_max_ms.max(1)),
        }
    }

    /// `attempt` is zero-based; at most `max_retries` resends follow the first try.
    pub fn should_retry(&self, err: &GatewayError, attempt: u32) -> bool {
        err.retryable && attempt < self.max_retries
    }

    /// Exponential delay before resend number `retry` (1-based), capped, with a small
    /// deterministic spread so parallel patient workers do not resend in lockstep.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let doubled = self
            .base
            .saturating_mul(1_u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX));
        let capped = doubled.min(self.cap);
        let spread_percent = 90 + (retry % 3) * 5;
        capped * spread_percent / 100
    }
}

#[derive(Debug, Clone, Default)]
struct Breaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open_probe: bool,
}

/// Per-backend circuit breakers shared by every request through the gateway.
#[derive(Clone)]
pub struct CircuitBreakers {
    failure_threshold: u32,
    open_for: Duration,
    breakers: Arc<Mutex<HashMap<BackendId, Breaker>>>,
}

impl CircuitBreakers {
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self {
            failure_threshold: config.breaker_failure_threshold.max(1),
            open_for: Duration::from_millis(config.breaker_open_ms.max(1)),
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rejects while open; once the open period lapses a single probe is let through.
    pub async fn admit(&self, backend_id: &BackendId) -> Result<(), GatewayError> {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(backend_id.clone()).or_default();
        let Some(open_until) = breaker.open_until else {
            return Ok(());
        };

        let reason = if Instant::now() < open_until {
            "circuit breaker is open"
        } else if breaker.half_open_probe {
            "circuit breaker probe already in flight"
        } else {
            breaker.half_open_probe = true;
            return Ok(());
        };
        Err(GatewayError::new(GatewayErrorKind::CircuitOpen, reason)
            .with_backend_id(backend_id.clone()))
    }

    pub async fn on_success(&self, backend_id: &BackendId) {
        let mut breakers = self.breakers.lock().await;
        breakers.insert(backend_id.clone(), Breaker::default());
    }

    pub async fn on_failure(&self, backend_id: &BackendId, err: &GatewayError) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(backend_id.clone()).or_default();
        breaker.half_open_probe = false;
        if !err.kind.degrades_backend() {
            return;
        }

        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        if breaker.consecutive_failures >= self.failure_threshold {
            breaker.open_until = Some(Instant::now() + self.open_for);
            tracing::warn!(
                target: "completion",
                backend_id = %backend_id,
                consecutive_failures = breaker.consecutive_failures,
                open_ms = self.open_for.as_millis() as u64,
                "circuit_opened"
            );
        }
    }
}
