use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    completion::{gateway::CompletionGateway, types::CompletionRequest},
    extractor::ports::{
        CompletionError, TextCompletionPort, completion_failed, completion_timeout,
    },
};

/// `TextCompletionPort` backed by the shared completion gateway.
#[derive(Clone)]
pub struct GatewayCompletionPort {
    gateway: Arc<CompletionGateway>,
    backend_id: Option<String>,
    model: Option<String>,
    purpose: &'static str,
}

impl GatewayCompletionPort {
    pub fn new(
        gateway: Arc<CompletionGateway>,
        backend_id: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            gateway,
            backend_id,
            model,
            purpose: "extraction",
        }
    }

    /// Tags requests so gateway logs tell extraction and review traffic apart.
    pub fn with_purpose(mut self, purpose: &'static str) -> Self {
        self.purpose = purpose;
        self
    }
}

#[async_trait]
impl TextCompletionPort for GatewayCompletionPort {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u64,
        timeout: Duration,
    ) -> Result<String, CompletionError> {
        let mut request = CompletionRequest::new(prompt, max_tokens, timeout);
        request.backend_hint = self.backend_id.clone();
        request.model_override = self.model.clone();
        request
            .metadata
            .insert("purpose".to_string(), self.purpose.to_string());

        match self.gateway.complete(request).await {
            Ok(response) => Ok(response.text),
            Err(err) if err.is_timeout() => Err(completion_timeout(err.to_string())),
            Err(err) => Err(completion_failed(err.to_string())),
        }
    }
}
