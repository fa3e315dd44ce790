use std::collections::{BTreeMap, HashMap};

use crate::completion::{
    error::{GatewayError, invalid_request},
    types::{BackendId, BackendProfile, CompletionGatewayConfig, CompletionRequest},
};

/// Picks a backend for each request.
///
/// An explicit `backend_hint` wins, then a route for the request's purpose, then the
/// configured default.
#[derive(Clone)]
pub struct BackendRouter {
    default_backend: BackendId,
    purpose_routes: BTreeMap<String, BackendId>,
    backends: HashMap<BackendId, BackendProfile>,
}

#[derive(Debug, Clone)]
pub struct SelectedBackend {
    pub backend_id: BackendId,
    pub profile: BackendProfile,
    pub resolved_model: String,
}

impl BackendRouter {
    pub fn new(config: &CompletionGatewayConfig) -> Result<Self, GatewayError> {
        if config.backends.is_empty() {
            return Err(invalid_request("completion.backends must not be empty"));
        }

        let mut backends = HashMap::with_capacity(config.backends.len());
        for profile in &config.backends {
            if backends.contains_key(&profile.id) {
                return Err(invalid_request(format!(
                    "duplicate backend id '{}' in completion.backends",
                    profile.id
                )));
            }
            backends.insert(profile.id.clone(), profile.clone());
        }

        let known = |id: &BackendId| backends.contains_key(id);
        if !known(&config.default_backend) {
            return Err(invalid_request(format!(
                "completion.default_backend '{}' does not exist",
                config.default_backend
            )));
        }
        if let Some((purpose, target)) = config
            .purpose_routes
            .iter()
            .find(|(_, target)| !known(target))
        {
            return Err(invalid_request(format!(
                "completion.purpose_routes.{purpose} points at unknown backend '{target}'"
            )));
        }

        Ok(Self {
            default_backend: config.default_backend.clone(),
            purpose_routes: config.purpose_routes.clone(),
            backends,
        })
    }

    pub fn select(&self, req: &CompletionRequest) -> Result<SelectedBackend, GatewayError> {
        let backend_id = req
            .backend_hint
            .as_ref()
            .or_else(|| {
                req.purpose()
                    .and_then(|purpose| self.purpose_routes.get(purpose))
            })
            .unwrap_or(&self.default_backend);

        let Some(profile) = self.backends.get(backend_id) else {
            return Err(invalid_request(format!(
                "selected backend '{backend_id}' does not exist"
            )));
        };

        let resolved_model = match &req.model_override {
            Some(model) => model.clone(),
            None => profile.default_model.clone(),
        };

        Ok(SelectedBackend {
            backend_id: backend_id.clone(),
            profile: profile.clone(),
            resolved_model,
        })
    }
}
