use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::sleep,
};

use crate::completion::{
    error::{GatewayError, GatewayErrorKind, internal_error},
    types::{BackendId, BudgetConfig, CompletionRequest},
};

/// Floor for a rate-smoothing wait, so a nearly full bucket does not spin.
const MIN_RATE_WAIT: Duration = Duration::from_millis(5);

/// Shared admission control in front of every backend.
///
/// Each backend gets one semaphore that bounds in-flight calls across all patient workers.
/// Tokio semaphores queue waiters in FIFO order. An optional token bucket smooths bursts.
#[derive(Clone)]
pub struct BudgetEnforcer {
    config: BudgetConfig,
    semaphores: Arc<Mutex<HashMap<BackendId, Arc<Semaphore>>>>,
    buckets: Arc<Mutex<HashMap<BackendId, TokenBucket>>>,
}

/// Admission for one request; dropping or releasing it frees the backend slot.
#[derive(Debug)]
pub struct BudgetLease {
    pub backend_id: BackendId,
    pub effective_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn full(per_second: u32, now: Instant) -> Self {
        Self {
            capacity: f64::from(per_second),
            tokens: f64::from(per_second),
            refilled_at: now,
        }
    }

    /// Takes one token, or says how long to wait until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        self.refilled_at = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let wait = Duration::from_secs_f64((1.0 - self.tokens) / self.capacity);
        Err(wait.max(MIN_RATE_WAIT))
    }
}

impl BudgetEnforcer {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            semaphores: Arc::new(Mutex::new(HashMap::new())),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Checks the token budget, waits for rate and concurrency admission, and caps the
    /// request timeout at `max_request_time_ms`.
    pub async fn pre_dispatch(
        &self,
        request: &CompletionRequest,
        backend_id: &BackendId,
    ) -> Result<BudgetLease, GatewayError> {
        if let Some(limit) = self.config.max_output_tokens_per_request
            && request.max_output_tokens > limit
        {
            return Err(GatewayError::new(
                GatewayErrorKind::BudgetExceeded,
                format!(
                    "max_output_tokens {} is above the per-request budget of {limit}",
                    request.max_output_tokens
                ),
            )
            .with_backend_id(backend_id.clone()));
        }

        self.wait_for_rate(backend_id).await;

        let semaphore = self.semaphore_for(backend_id).await;
        let permit = semaphore.acquire_owned().await.map_err(|_| {
            internal_error("backend concurrency semaphore was closed")
                .with_backend_id(backend_id.clone())
        })?;

        let cap = Duration::from_millis(self.config.max_request_time_ms.max(1));
        let effective_timeout = request.timeout.min(cap).max(Duration::from_millis(1));

        Ok(BudgetLease {
            backend_id: backend_id.clone(),
            effective_timeout,
            _permit: permit,
        })
    }

    pub fn release(&self, lease: BudgetLease) {
        drop(lease);
    }

    async fn semaphore_for(&self, backend_id: &BackendId) -> Arc<Semaphore> {
        let slots = self.config.max_concurrency_per_backend.max(1) as usize;
        let mut semaphores = self.semaphores.lock().await;
        Arc::clone(
            semaphores
                .entry(backend_id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(slots))),
        )
    }

    async fn wait_for_rate(&self, backend_id: &BackendId) {
        let Some(per_second) = self.config.rate_smoothing_per_second.filter(|rps| *rps > 0) else {
            return;
        };

        loop {
            let taken = {
                let now = Instant::now();
                let mut buckets = self.buckets.lock().await;
                buckets
                    .entry(backend_id.clone())
                    .or_insert_with(|| TokenBucket::full(per_second, now))
                    .take(now)
            };
            match taken {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(
                        target: "completion",
                        backend_id = %backend_id,
                        wait_ms = wait.as_millis() as u64,
                        "rate_smoothing_wait"
                    );
                    sleep(wait).await;
                }
            }
        }
    }
}
