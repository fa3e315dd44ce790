use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::time::{sleep, timeout};
use tracing::Instrument;
use uuid::Uuid;

use crate::completion::{
    adapters::{CompletionAdapter, build_default_adapters},
    budget::BudgetEnforcer,
    credentials::CredentialProvider,
    error::{GatewayError, invalid_request, timeout_error},
    reliability::{CircuitBreakers, RetryPolicy},
    router::{BackendRouter, SelectedBackend},
    telemetry::{GatewayTelemetryEvent, RequestStage, TelemetrySink},
    types::{
        AdapterContext, AdapterOutput, BackendDialect, CompletionGatewayConfig,
        CompletionRequest, CompletionResponse, RequestId, ResolvedCredential,
    },
};

/// Provider-agnostic text completion shared by every patient worker.
pub struct CompletionGateway {
    router: BackendRouter,
    credential_provider: Arc<dyn CredentialProvider>,
    adapters: HashMap<BackendDialect, Arc<dyn CompletionAdapter>>,
    budget_enforcer: BudgetEnforcer,
    retry_policy: RetryPolicy,
    breakers: CircuitBreakers,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Everything fixed for the lifetime of one request, across its attempts.
struct Dispatch<'a> {
    request_id: RequestId,
    selected: SelectedBackend,
    credential: ResolvedCredential,
    adapter: Arc<dyn CompletionAdapter>,
    request: &'a CompletionRequest,
}

impl CompletionGateway {
    pub fn new(
        config: CompletionGatewayConfig,
        credential_provider: Arc<dyn CredentialProvider>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, GatewayError> {
        let router = BackendRouter::new(&config)?;
        Ok(Self {
            router,
            credential_provider,
            adapters: build_default_adapters(),
            retry_policy: RetryPolicy::from_config(&config.reliability),
            breakers: CircuitBreakers::from_config(&config.reliability),
            budget_enforcer: BudgetEnforcer::new(config.budget),
            telemetry,
        })
    }

    /// Replaces the dialect adapters; tests use this to script backend behavior.
    pub fn with_adapters(
        mut self,
        adapters: HashMap<BackendDialect, Arc<dyn CompletionAdapter>>,
    ) -> Self {
        self.adapters = adapters;
        self
    }

    /// Sends one prompt, retrying transient failures under the retry policy.
    ///
    /// The budget lease is held across retries so a retrying request keeps its backend slot.
    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        if request.prompt.trim().is_empty() {
            return Err(invalid_request("prompt must not be empty"));
        }
        if request.max_output_tokens == 0 {
            return Err(invalid_request("max_output_tokens must be positive"));
        }

        let dispatch = self.prepare(&request).await?;
        let lease = self
            .budget_enforcer
            .pre_dispatch(&request, &dispatch.selected.backend_id)
            .await?;

        let span = tracing::info_span!(
            target: "completion",
            "completion_request",
            request_id = %dispatch.request_id,
            backend_id = %dispatch.selected.backend_id,
            model = %dispatch.selected.resolved_model,
            purpose = request.purpose().unwrap_or("-"),
            timeout_ms = lease.effective_timeout.as_millis() as u64,
        );
        self.emit(
            &dispatch,
            RequestStage::Started {
                model: dispatch.selected.resolved_model.clone(),
                purpose: request.purpose().map(str::to_string),
            },
        );

        let started_at = Instant::now();
        let (outcome, attempts) = self
            .run_attempts(&dispatch, lease.effective_timeout)
            .instrument(span)
            .await;
        self.budget_enforcer.release(lease);

        match outcome {
            Ok(output) => {
                self.emit(
                    &dispatch,
                    RequestStage::Completed {
                        attempts,
                        elapsed_ms: started_at.elapsed().as_millis() as u64,
                        usage: output.usage,
                    },
                );
                Ok(CompletionResponse {
                    request_id: dispatch.request_id,
                    backend_id: dispatch.selected.backend_id,
                    model: dispatch.selected.resolved_model,
                    text: output.text,
                    usage: output.usage,
                    attempts,
                })
            }
            Err(err) => {
                self.emit(
                    &dispatch,
                    RequestStage::Failed {
                        attempts,
                        kind: err.kind,
                    },
                );
                Err(err)
            }
        }
    }

    async fn prepare<'a>(
        &self,
        request: &'a CompletionRequest,
    ) -> Result<Dispatch<'a>, GatewayError> {
        let selected = self.router.select(request)?;
        let Some(adapter) = self.adapters.get(&selected.profile.dialect).cloned() else {
            return Err(invalid_request(format!(
                "adapter for dialect {} is not registered",
                selected.profile.dialect
            ))
            .with_backend_id(selected.backend_id.as_str()));
        };
        let credential = self
            .credential_provider
            .resolve(&selected.profile.credential, &selected.profile)
            .await?;

        Ok(Dispatch {
            request_id: request
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            selected,
            credential,
            adapter,
            request,
        })
    }

    /// Returns the final outcome and the number of dispatches made.
    async fn run_attempts(
        &self,
        dispatch: &Dispatch<'_>,
        attempt_timeout: Duration,
    ) -> (Result<AdapterOutput, GatewayError>, u32) {
        let backend_id = &dispatch.selected.backend_id;
        let mut attempt = 0_u32;

        loop {
            if let Err(err) = self.breakers.admit(backend_id).await {
                return (Err(err), attempt + 1);
            }

            let ctx = AdapterContext {
                backend_id: backend_id.clone(),
                model: dispatch.selected.resolved_model.clone(),
                profile: dispatch.selected.profile.clone(),
                credential: dispatch.credential.clone(),
                timeout: attempt_timeout,
                request_id: dispatch.request_id.clone(),
            };
            let call = dispatch.adapter.complete(ctx, dispatch.request);
            let result = timeout(attempt_timeout, call).await.unwrap_or_else(|_| {
                let limit_ms = attempt_timeout.as_millis();
                Err(timeout_error(format!("completion exceeded {limit_ms} ms"))
                    .with_backend_id(backend_id.as_str()))
            });

            let err = match result {
                Ok(output) => {
                    self.breakers.on_success(backend_id).await;
                    return (Ok(output), attempt + 1);
                }
                Err(err) => err,
            };

            let will_retry = self.retry_policy.should_retry(&err, attempt);
            tracing::debug!(
                target: "completion",
                attempt,
                kind = ?err.kind,
                retryable = err.retryable,
                will_retry,
                error = %err.message,
                "attempt_failed"
            );
            self.emit(
                dispatch,
                RequestStage::AttemptFailed {
                    attempt,
                    kind: err.kind,
                    retryable: err.retryable,
                },
            );
            self.breakers.on_failure(backend_id, &err).await;

            if !will_retry {
                return (Err(err), attempt + 1);
            }
            attempt += 1;
            sleep(self.retry_policy.delay_before(attempt)).await;
        }
    }

    fn emit(&self, dispatch: &Dispatch<'_>, stage: RequestStage) {
        self.telemetry.on_event(GatewayTelemetryEvent {
            request_id: dispatch.request_id.clone(),
            backend_id: dispatch.selected.backend_id.clone(),
            stage,
        });
    }
}
