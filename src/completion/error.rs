use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::types::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    InvalidRequest,
    Authentication,
    Authorization,
    RateLimited,
    Timeout,
    CircuitOpen,
    BudgetExceeded,
    BackendTransient,
    BackendPermanent,
    ProtocolViolation,
    Internal,
}

impl GatewayErrorKind {
    /// Only throttling and transient transport failures are worth resending as-is.
    pub fn retryable_by_default(self) -> bool {
        matches!(self, Self::RateLimited | Self::BackendTransient)
    }

    /// Failures that say something about backend health rather than about the request.
    pub fn degrades_backend(self) -> bool {
        matches!(
            self,
            Self::BackendTransient | Self::Timeout | Self::RateLimited
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{message}{}", origin_suffix(.backend_id.as_deref(), *.provider_http_status))]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    pub retryable: bool,
    pub backend_id: Option<BackendId>,
    pub provider_http_status: Option<u16>,
}

fn origin_suffix(backend_id: Option<&str>, status: Option<u16>) -> String {
    match (backend_id, status) {
        (Some(backend_id), Some(status)) => format!(" (backend={backend_id}, status={status})"),
        (Some(backend_id), None) => format!(" (backend={backend_id})"),
        (None, Some(status)) => format!(" (status={status})"),
        (None, None) => String::new(),
    }
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable_by_default(),
            backend_id: None,
            provider_http_status: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }

    pub fn with_provider_http_status(mut self, status: u16) -> Self {
        self.provider_http_status = Some(status);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == GatewayErrorKind::Timeout
    }
}

pub fn invalid_request(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::InvalidRequest, message)
}

/// Timeouts are never resent verbatim; the extractor retries them with a shorter prompt.
pub fn timeout_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::Timeout, message)
}

pub fn internal_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::Internal, message)
}
