use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub type BackendId = String;
pub type ModelId = String;
pub type RequestId = String;

/// Wire protocol spoken by a completion backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackendDialect {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

impl BackendDialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAiCompatible => "openai_compatible",
        }
    }
}

impl fmt::Display for BackendDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a backend's bearer token comes from. Local Ollama usually needs none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    None,
    Env { var: String },
    InlineToken { token: String },
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedCredential {
    pub auth_header: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl ResolvedCredential {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendProfile {
    pub id: BackendId,
    pub dialect: BackendDialect,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub credential: CredentialRef,
    pub default_model: ModelId,
}

/// Retry and circuit-breaker tuning; every field may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
            breaker_failure_threshold: 5,
            breaker_open_ms: 15_000,
        }
    }
}

/// Admission limits applied before any backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_request_time_ms: u64,
    pub max_output_tokens_per_request: Option<u64>,
    pub max_concurrency_per_backend: u32,
    pub rate_smoothing_per_second: Option<u32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_request_time_ms: 30_000,
            max_output_tokens_per_request: None,
            max_concurrency_per_backend: 4,
            rate_smoothing_per_second: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionGatewayConfig {
    pub default_backend: BackendId,
    pub backends: Vec<BackendProfile>,
    /// Request purpose (`extraction`, `review`, ...) to the backend that serves it.
    #[serde(default)]
    pub purpose_routes: BTreeMap<String, BackendId>,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// One prompt in, one text out.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub request_id: Option<RequestId>,
    pub backend_hint: Option<BackendId>,
    pub model_override: Option<ModelId>,
    pub prompt: String,
    pub max_output_tokens: u64,
    pub timeout: Duration,
    pub metadata: BTreeMap<String, String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_output_tokens: u64, timeout: Duration) -> Self {
        Self {
            request_id: None,
            backend_hint: None,
            model_override: None,
            prompt: prompt.into(),
            max_output_tokens,
            timeout,
            metadata: BTreeMap::new(),
        }
    }

    pub fn purpose(&self) -> Option<&str> {
        self.metadata.get("purpose").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub request_id: RequestId,
    pub backend_id: BackendId,
    pub model: ModelId,
    pub text: String,
    pub usage: Option<UsageStats>,
    /// Dispatches made, including the successful one.
    pub attempts: u32,
}

/// What an adapter hands back for one dispatch.
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    pub text: String,
    pub usage: Option<UsageStats>,
}

/// Everything an adapter needs for one dispatch, resolved by the gateway.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub backend_id: BackendId,
    pub model: ModelId,
    pub profile: BackendProfile,
    pub credential: ResolvedCredential,
    pub timeout: Duration,
    pub request_id: RequestId,
}
