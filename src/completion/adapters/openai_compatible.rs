use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::completion::{
    adapters::{CompletionAdapter, http_common},
    error::{GatewayError, GatewayErrorKind},
    types::{AdapterContext, AdapterOutput, BackendDialect, CompletionRequest, UsageStats},
};

/// Any server exposing an OpenAI-style `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    client: Client,
}

impl Default for OpenAiCompatibleAdapter {
    fn default() -> Self {
        Self {
            client: http_common::pooled_client(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default, alias = "input_tokens")]
    prompt_tokens: Option<u64>,
    #[serde(default, alias = "output_tokens")]
    completion_tokens: Option<u64>,
}

#[async_trait]
impl CompletionAdapter for OpenAiCompatibleAdapter {
    fn dialect(&self) -> BackendDialect {
        BackendDialect::OpenAiCompatible
    }

    #[tracing::instrument(
        name = "openai_compatible_complete",
        target = "completion.openai_compatible",
        skip(self, ctx, req),
        fields(request_id = %ctx.request_id, backend_id = %ctx.backend_id, model = %ctx.model)
    )]
    async fn complete(
        &self,
        ctx: AdapterContext,
        req: &CompletionRequest,
    ) -> Result<AdapterOutput, GatewayError> {
        let body = json!({
            "model": ctx.model,
            "messages": [{ "role": "user", "content": req.prompt }],
            "max_tokens": req.max_output_tokens,
            "temperature": 0,
            "stream": false,
        });

        let payload = http_common::post_json(
            &self.client,
            &ctx,
            "openai-compatible",
            "/chat/completions",
            &body,
        )
        .await?;
        parse_chat_completion(&payload).map_err(|err| err.with_backend_id(ctx.backend_id))
    }
}

/// Reads the first choice; later choices are ignored.
pub fn parse_chat_completion(payload: &Value) -> Result<AdapterOutput, GatewayError> {
    let malformed = |detail: String| {
        GatewayError::new(
            GatewayErrorKind::ProtocolViolation,
            format!("openai-compatible response {detail}"),
        )
    };
    let reply = ChatReply::deserialize(payload)
        .map_err(|err| malformed(format!("is malformed: {err}")))?;
    let Some(choice) = reply.choices.into_iter().next() else {
        return Err(malformed("missing choices".to_string()));
    };

    let text = match choice.message.content {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let usage = reply.usage.map(|usage| UsageStats {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    });

    Ok(AdapterOutput { text, usage })
}
