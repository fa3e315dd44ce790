use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, header};
use serde_json::Value;

use crate::completion::{
    error::{GatewayError, GatewayErrorKind, invalid_request, timeout_error},
    types::{AdapterContext, ResolvedCredential},
};

/// Connection-pooling client shared by one adapter instance.
pub fn pooled_client() -> Client {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client must build")
}

pub fn require_endpoint(ctx: &AdapterContext, dialect_name: &str) -> Result<String, GatewayError> {
    ctx.profile
        .endpoint
        .as_deref()
        .map(|endpoint| endpoint.trim_end_matches('/'))
        .filter(|endpoint| !endpoint.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            invalid_request(format!("{dialect_name} backend requires endpoint"))
                .with_backend_id(ctx.backend_id.as_str())
        })
}

pub fn apply_credential(
    builder: RequestBuilder,
    credential: &ResolvedCredential,
) -> RequestBuilder {
    let builder = match &credential.auth_header {
        Some(auth_header) => builder.header(header::AUTHORIZATION, auth_header),
        None => builder,
    };
    credential
        .extra_headers
        .iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value))
}

/// POSTs `body` to `{endpoint}{path}` and returns the decoded JSON reply.
///
/// Non-2xx statuses become gateway errors carrying the status and a clipped body.
pub async fn post_json(
    client: &Client,
    ctx: &AdapterContext,
    dialect_name: &str,
    path: &str,
    body: &Value,
) -> Result<Value, GatewayError> {
    let url = format!("{}{path}", require_endpoint(ctx, dialect_name)?);
    let started_at = Instant::now();

    let request = client
        .post(url)
        .timeout(ctx.timeout)
        .header("x-request-id", ctx.request_id.as_str())
        .json(body);
    let response = apply_credential(request, &ctx.credential)
        .send()
        .await
        .map_err(|err| map_send_error(err, &ctx.backend_id, dialect_name))?;

    let status = response.status();
    tracing::debug!(
        target: "completion.http",
        dialect = dialect_name,
        status = status.as_u16(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "http_response_headers"
    );
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(map_http_error(status.as_u16(), &ctx.backend_id, &text));
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| map_send_error(err, &ctx.backend_id, dialect_name))
}

pub fn map_send_error(err: reqwest::Error, backend_id: &str, dialect_name: &str) -> GatewayError {
    let mapped = if err.is_timeout() {
        timeout_error(format!("{dialect_name} request timed out"))
    } else {
        GatewayError::new(
            GatewayErrorKind::BackendTransient,
            format!("{dialect_name} request failed: {err}"),
        )
    };
    mapped.with_backend_id(backend_id)
}

/// Response bodies are clipped before they are folded into the error message.
const ERROR_BODY_CHARS: usize = 240;

pub fn map_http_error(status: u16, backend_id: &str, body: &str) -> GatewayError {
    let kind = match status {
        401 => GatewayErrorKind::Authentication,
        403 => GatewayErrorKind::Authorization,
        408 | 429 => GatewayErrorKind::RateLimited,
        400..=499 => GatewayErrorKind::InvalidRequest,
        _ => GatewayErrorKind::BackendTransient,
    };
    let summary = match kind {
        GatewayErrorKind::Authentication => "authentication failed".to_string(),
        GatewayErrorKind::Authorization => "authorization failed".to_string(),
        _ => format!("backend returned status {status}"),
    };

    let clipped: String = body.trim().chars().take(ERROR_BODY_CHARS).collect();
    let message = if clipped.is_empty() {
        summary
    } else {
        format!("{summary}: {clipped}")
    };

    GatewayError::new(kind, message)
        .with_backend_id(backend_id)
        .with_provider_http_status(status)
}
