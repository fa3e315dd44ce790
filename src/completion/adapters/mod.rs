use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::completion::{
    error::GatewayError,
    types::{AdapterContext, AdapterOutput, BackendDialect, CompletionRequest},
};

pub mod http_common;
pub mod ollama;
pub mod openai_compatible;

/// One wire protocol. Adapters do a single dispatch; retries live in the gateway.
#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    fn dialect(&self) -> BackendDialect;

    async fn complete(
        &self,
        ctx: AdapterContext,
        req: &CompletionRequest,
    ) -> Result<AdapterOutput, GatewayError>;
}

/// Adapters for every supported dialect, keyed by the dialect each reports.
pub fn build_default_adapters() -> HashMap<BackendDialect, Arc<dyn CompletionAdapter>> {
    let adapters: [Arc<dyn CompletionAdapter>; 2] = [
        Arc::new(ollama::OllamaAdapter::default()),
        Arc::new(openai_compatible::OpenAiCompatibleAdapter::default()),
    ];
    adapters
        .into_iter()
        .map(|adapter| (adapter.dialect(), adapter))
        .collect()
}
