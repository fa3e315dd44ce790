use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::completion::{
    error::GatewayErrorKind,
    types::{BackendId, RequestId, UsageStats},
};

/// One step in a completion request's life, tagged with where it ran.
#[derive(Debug, Clone)]
pub struct GatewayTelemetryEvent {
    pub request_id: RequestId,
    pub backend_id: BackendId,
    pub stage: RequestStage,
}

#[derive(Debug, Clone)]
pub enum RequestStage {
    Started {
        model: String,
        purpose: Option<String>,
    },
    AttemptFailed {
        attempt: u32,
        kind: GatewayErrorKind,
        retryable: bool,
    },
    Completed {
        attempts: u32,
        elapsed_ms: u64,
        usage: Option<UsageStats>,
    },
    Failed {
        attempts: u32,
        kind: GatewayErrorKind,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: GatewayTelemetryEvent);
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: GatewayTelemetryEvent) {}
}

/// Request totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayTotals {
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub failed_attempts: u64,
    pub output_tokens: u64,
}

/// Logs every event under the `completion.telemetry` target and keeps run totals.
#[derive(Default)]
pub struct TracingTelemetrySink {
    requests: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    failed_attempts: AtomicU64,
    output_tokens: AtomicU64,
}

impl TracingTelemetrySink {
    pub fn totals(&self) -> GatewayTotals {
        GatewayTotals {
            requests: self.requests.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

impl TelemetrySink for TracingTelemetrySink {
    fn on_event(&self, event: GatewayTelemetryEvent) {
        let GatewayTelemetryEvent {
            request_id,
            backend_id,
            stage,
        } = event;

        match stage {
            RequestStage::Started { model, purpose } => {
                self.requests.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "completion.telemetry",
                    request_id = %request_id,
                    backend_id = %backend_id,
                    model = %model,
                    purpose = purpose.as_deref().unwrap_or("-"),
                    "request_started"
                );
            }
            RequestStage::AttemptFailed {
                attempt,
                kind,
                retryable,
            } => {
                self.failed_attempts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "completion.telemetry",
                    request_id = %request_id,
                    backend_id = %backend_id,
                    attempt,
                    kind = ?kind,
                    retryable,
                    "attempt_failed"
                );
            }
            RequestStage::Completed {
                attempts,
                elapsed_ms,
                usage,
            } => {
                let usage = usage.unwrap_or_default();
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.output_tokens
                    .fetch_add(usage.output_tokens.unwrap_or(0), Ordering::Relaxed);
                tracing::info!(
                    target: "completion.telemetry",
                    request_id = %request_id,
                    backend_id = %backend_id,
                    attempts,
                    elapsed_ms,
                    input_tokens = ?usage.input_tokens,
                    output_tokens = ?usage.output_tokens,
                    "request_completed"
                );
            }
            RequestStage::Failed { attempts, kind } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "completion.telemetry",
                    request_id = %request_id,
                    backend_id = %backend_id,
                    attempts,
                    kind = ?kind,
                    "request_failed"
                );
            }
        }
    }
}
