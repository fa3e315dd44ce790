use std::{fmt, time::Duration};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    Timeout,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == CompletionErrorKind::Timeout
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompletionError {}

pub fn completion_timeout(message: impl Into<String>) -> CompletionError {
    CompletionError::new(CompletionErrorKind::Timeout, message)
}

pub fn completion_failed(message: impl Into<String>) -> CompletionError {
    CompletionError::new(CompletionErrorKind::Failed, message)
}

/// Provider-agnostic text completion: `complete(prompt, max_tokens, timeout) -> text`.
#[async_trait]
pub trait TextCompletionPort: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u64,
        timeout: Duration,
    ) -> Result<String, CompletionError>;
}
