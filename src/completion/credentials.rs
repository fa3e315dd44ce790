use std::env;

use async_trait::async_trait;

use crate::completion::{
    error::{GatewayError, GatewayErrorKind},
    types::{BackendProfile, CredentialRef, ResolvedCredential},
};

/// Turns a backend's credential reference into request headers.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        backend: &BackendProfile,
    ) -> Result<ResolvedCredential, GatewayError>;
}

/// Reads bearer tokens from the process environment or from inline config.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        backend: &BackendProfile,
    ) -> Result<ResolvedCredential, GatewayError> {
        let raw = match reference {
            CredentialRef::None => return Ok(ResolvedCredential::none()),
            CredentialRef::InlineToken { token } => token.clone(),
            CredentialRef::Env { var } => env::var(var).map_err(|err| {
                unauthenticated(backend, format!("credential variable {var} is unusable: {err}"))
            })?,
        };

        bearer(&raw).ok_or_else(|| {
            let source = match reference {
                CredentialRef::Env { var } => format!("credential variable {var}"),
                _ => "inline credential token".to_string(),
            };
            unauthenticated(backend, format!("{source} is empty"))
        })
    }
}

fn bearer(token: &str) -> Option<ResolvedCredential> {
    let token = token.trim();
    (!token.is_empty()).then(|| ResolvedCredential {
        auth_header: Some(format!("Bearer {token}")),
        extra_headers: Vec::new(),
    })
}

fn unauthenticated(backend: &BackendProfile, message: String) -> GatewayError {
    GatewayError::new(GatewayErrorKind::Authentication, message)
        .with_backend_id(backend.id.as_str())
}
