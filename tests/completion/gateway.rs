use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use abstractor::{
    completion::{
        adapters::CompletionAdapter,
        credentials::EnvCredentialProvider,
        error::{GatewayError, GatewayErrorKind},
        gateway::CompletionGateway,
        telemetry::{GatewayTelemetryEvent, RequestStage, TelemetrySink},
        types::{
            AdapterContext, AdapterOutput, BackendDialect, BackendProfile, BudgetConfig,
            CompletionGatewayConfig, CompletionRequest, CredentialRef, ReliabilityConfig,
        },
    },
    extractor::{TextCompletionPort, adapters::GatewayCompletionPort},
};

enum Step {
    Reply(&'static str),
    Transient,
    Permanent,
    Hang,
}

struct ScriptedAdapter {
    steps: Vec<Step>,
    calls: AtomicUsize,
    seen_models: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            calls: AtomicUsize::new(0),
            seen_models: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionAdapter for ScriptedAdapter {
    fn dialect(&self) -> BackendDialect {
        BackendDialect::Ollama
    }

    async fn complete(
        &self,
        ctx: AdapterContext,
        _req: &CompletionRequest,
    ) -> Result<AdapterOutput, GatewayError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_models
            .lock()
            .expect("models lock")
            .push(ctx.model.clone());
        let step = self
            .steps
            .get(index)
            .or_else(|| self.steps.last())
            .expect("adapter script should not be empty");
        match step {
            Step::Reply(text) => Ok(AdapterOutput {
                text: text.to_string(),
                usage: None,
            }),
            Step::Transient => Err(GatewayError::new(
                GatewayErrorKind::BackendTransient,
                "backend returned 503",
            )),
            Step::Permanent => Err(GatewayError::new(
                GatewayErrorKind::BackendPermanent,
                "backend returned 400",
            )
            .with_retryable(false)),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(AdapterOutput {
                    text: "late".to_string(),
                    usage: None,
                })
            }
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<GatewayTelemetryEvent>>,
}

impl RecordingSink {
    fn failed_attempts(&self) -> usize {
        self.events
            .lock()
            .expect("events lock")
            .iter()
            .filter(|event| matches!(event.stage, RequestStage::AttemptFailed { .. }))
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn on_event(&self, event: GatewayTelemetryEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

fn config(max_retries: u32) -> CompletionGatewayConfig {
    CompletionGatewayConfig {
        default_backend: "local".to_string(),
        backends: vec![BackendProfile {
            id: "local".to_string(),
            dialect: BackendDialect::Ollama,
            endpoint: None,
            credential: CredentialRef::None,
            default_model: "llama3.1:8b".to_string(),
        }],
        purpose_routes: Default::default(),
        reliability: ReliabilityConfig {
            max_retries,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            breaker_failure_threshold: 10,
            breaker_open_ms: 1_000,
        },
        budget: BudgetConfig::default(),
    }
}

fn gateway(
    max_retries: u32,
    adapter: Arc<ScriptedAdapter>,
    sink: Arc<RecordingSink>,
) -> CompletionGateway {
    let mut adapters: HashMap<BackendDialect, Arc<dyn CompletionAdapter>> = HashMap::new();
    adapters.insert(BackendDialect::Ollama, adapter);
    CompletionGateway::new(config(max_retries), Arc::new(EnvCredentialProvider), sink)
        .expect("gateway")
        .with_adapters(adapters)
}

fn request(timeout: Duration) -> CompletionRequest {
    CompletionRequest::new("Variable: tumor_location\n", 64, timeout)
}

#[tokio::test]
async fn given_transient_failure_when_completing_then_request_is_retried_once() {
    let adapter = ScriptedAdapter::new(vec![
        Step::Transient,
        Step::Reply("{\"value\": \"Brain Stem\"}"),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let gateway = gateway(1, Arc::clone(&adapter), Arc::clone(&sink));

    let response = gateway
        .complete(request(Duration::from_secs(2)))
        .await
        .expect("retry should succeed");

    assert_eq!(response.attempts, 2);
    assert_eq!(response.backend_id, "local");
    assert_eq!(response.model, "llama3.1:8b");
    assert!(response.text.contains("Brain Stem"));
    assert_eq!(adapter.calls(), 2);
    assert_eq!(sink.failed_attempts(), 1);
}

#[tokio::test]
async fn given_retries_exhausted_when_completing_then_last_error_is_returned() {
    let adapter = ScriptedAdapter::new(vec![Step::Transient]);
    let gateway = gateway(2, Arc::clone(&adapter), Arc::new(RecordingSink::default()));

    let err = gateway
        .complete(request(Duration::from_secs(2)))
        .await
        .expect_err("all attempts fail");

    assert_eq!(err.kind, GatewayErrorKind::BackendTransient);
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test]
async fn given_permanent_failure_when_completing_then_no_retry_happens() {
    let adapter = ScriptedAdapter::new(vec![Step::Permanent, Step::Reply("unused")]);
    let gateway = gateway(3, Arc::clone(&adapter), Arc::new(RecordingSink::default()));

    let err = gateway
        .complete(request(Duration::from_secs(2)))
        .await
        .expect_err("permanent failure");

    assert_eq!(err.kind, GatewayErrorKind::BackendPermanent);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn given_slow_backend_when_completing_then_timeout_is_not_resent() {
    let adapter = ScriptedAdapter::new(vec![Step::Hang]);
    let gateway = gateway(3, Arc::clone(&adapter), Arc::new(RecordingSink::default()));

    let err = gateway
        .complete(request(Duration::from_millis(30)))
        .await
        .expect_err("should time out");

    assert!(err.is_timeout());
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn given_empty_prompt_when_completing_then_adapter_is_never_called() {
    let adapter = ScriptedAdapter::new(vec![Step::Reply("unused")]);
    let gateway = gateway(1, Arc::clone(&adapter), Arc::new(RecordingSink::default()));

    let err = gateway
        .complete(CompletionRequest::new("   ", 64, Duration::from_secs(1)))
        .await
        .expect_err("empty prompt");

    assert_eq!(err.kind, GatewayErrorKind::InvalidRequest);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn given_gateway_port_when_backend_times_out_then_port_reports_completion_timeout() {
    let adapter = ScriptedAdapter::new(vec![Step::Hang]);
    let gateway = Arc::new(gateway(0, Arc::clone(&adapter), Arc::new(RecordingSink::default())));
    let port = GatewayCompletionPort::new(gateway, None, Some("llama3.1:70b".to_string()));

    let err = port
        .complete("Variable: tumor_location\n", 64, Duration::from_millis(30))
        .await
        .expect_err("should time out");

    assert!(err.is_timeout());
    assert_eq!(
        adapter.seen_models.lock().expect("models lock").as_slice(),
        ["llama3.1:70b".to_string()]
    );
}

#[tokio::test]
async fn given_gateway_port_when_backend_answers_then_text_is_returned() {
    let adapter = ScriptedAdapter::new(vec![Step::Reply("{\"value\": \"NOT_FOUND\"}")]);
    let gateway = Arc::new(gateway(0, adapter, Arc::new(RecordingSink::default())));
    let port = GatewayCompletionPort::new(gateway, None, None).with_purpose("review");

    let text = port
        .complete("Variable: tumor_location\n", 64, Duration::from_secs(1))
        .await
        .expect("answer");

    assert_eq!(text, "{\"value\": \"NOT_FOUND\"}");
}
