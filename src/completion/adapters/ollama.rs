use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::completion::{
    adapters::{CompletionAdapter, http_common},
    error::{GatewayError, GatewayErrorKind},
    types::{AdapterContext, AdapterOutput, BackendDialect, CompletionRequest, UsageStats},
};

/// Local model server speaking the Ollama `/api/generate` protocol.
#[derive(Clone)]
pub struct OllamaAdapter {
    client: Client,
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self {
            client: http_common::pooled_client(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[async_trait]
impl CompletionAdapter for OllamaAdapter {
    fn dialect(&self) -> BackendDialect {
        BackendDialect::Ollama
    }

    #[tracing::instrument(
        name = "ollama_complete",
        target = "completion.ollama",
        skip(self, ctx, req),
        fields(request_id = %ctx.request_id, backend_id = %ctx.backend_id, model = %ctx.model)
    )]
    async fn complete(
        &self,
        ctx: AdapterContext,
        req: &CompletionRequest,
    ) -> Result<AdapterOutput, GatewayError> {
        // Deterministic decoding; abstraction answers must be reproducible.
        let body = json!({
            "model": ctx.model,
            "prompt": req.prompt,
            "stream": false,
            "options": {
                "num_predict": req.max_output_tokens,
                "temperature": 0,
            },
        });

        let payload =
            http_common::post_json(&self.client, &ctx, "ollama", "/api/generate", &body).await?;
        parse_generate_payload(&payload).map_err(|err| err.with_backend_id(ctx.backend_id))
    }
}

pub fn parse_generate_payload(payload: &Value) -> Result<AdapterOutput, GatewayError> {
    let reply = GenerateReply::deserialize(payload).map_err(|err| {
        GatewayError::new(
            GatewayErrorKind::ProtocolViolation,
            format!("malformed ollama reply: {err}"),
        )
    })?;

    if let Some(message) = reply.error {
        return Err(GatewayError::new(
            GatewayErrorKind::BackendPermanent,
            format!("ollama reported error: {message}"),
        ));
    }
    let Some(text) = reply.response else {
        return Err(GatewayError::new(
            GatewayErrorKind::ProtocolViolation,
            "ollama response missing 'response' field",
        ));
    };

    let usage = (reply.prompt_eval_count.is_some() || reply.eval_count.is_some()).then_some(
        UsageStats {
            input_tokens: reply.prompt_eval_count,
            output_tokens: reply.eval_count,
        },
    );
    Ok(AdapterOutput { text, usage })
}
