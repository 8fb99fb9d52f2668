//! Endpoint registry
//!
//! Built once at startup from the validated configuration and read-only
//! afterwards. Concurrent readers need no synchronization: the registry is
//! shared behind an `Arc` and never mutated.

use crate::config::Config;
use crate::error::{AppError, AppResult, GatewayError};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque key identifying a logical model
pub type ModelId = String;

/// Bearer credential for an upstream endpoint
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One backend inference endpoint
///
/// Immutable after load. Other components hold `Arc<Endpoint>` references.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    base_url: String,
    credential: Option<Credential>,
    weight: u32,
    models: Vec<ModelId>,
    headers: HeaderMap,
    model_map: HashMap<ModelId, String>,
}

impl Endpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL without a trailing slash (e.g. `http://host:8000/v1`)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the chat completions route on this endpoint
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn models(&self) -> &[ModelId] {
        &self.models
    }

    pub fn serves(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Custom headers merged into every outbound request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Model name to put in the outbound body for a gateway ModelId
    pub fn upstream_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_map.get(model).map(String::as_str).unwrap_or(model)
    }
}

/// Read-only set of configured endpoints, indexed by model
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    by_model: HashMap<ModelId, Vec<Arc<Endpoint>>>,
    model_ids: Vec<ModelId>,
}

impl EndpointRegistry {
    /// Build the registry from a validated configuration
    ///
    /// Resolves credentials (including `api_key_env` lookups) and custom headers.
    ///
    /// # Errors
    /// Returns `AppError::Config` if a credential cannot be resolved or a header
    /// cannot be represented.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        let mut by_model: HashMap<ModelId, Vec<Arc<Endpoint>>> = HashMap::new();
        let mut model_ids = Vec::new();

        for (index, descriptor) in config.endpoints.iter().enumerate() {
            let name = descriptor.resolved_name(index);

            let mut headers = HeaderMap::new();
            for (key, value) in descriptor.headers() {
                let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    AppError::Config(format!("Endpoint '{}' header '{}': {}", name, key, e))
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|e| {
                    AppError::Config(format!("Endpoint '{}' header '{}': {}", name, key, e))
                })?;
                headers.insert(header_name, header_value);
            }

            let endpoint = Arc::new(Endpoint {
                name,
                base_url: descriptor.base_url().trim_end_matches('/').to_string(),
                credential: descriptor.resolve_api_key()?.map(Credential::new),
                weight: descriptor.weight(),
                models: descriptor.models().to_vec(),
                headers,
                model_map: descriptor
                    .model_map()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            });

            for model in endpoint.models() {
                let entry = by_model.entry(model.clone()).or_default();
                if entry.is_empty() {
                    model_ids.push(model.clone());
                }
                // An endpoint listing a model twice still appears once
                if !entry.iter().any(|e| Arc::ptr_eq(e, &endpoint)) {
                    entry.push(Arc::clone(&endpoint));
                }
            }

            endpoints.push(endpoint);
        }

        tracing::info!(
            endpoints = endpoints.len(),
            models = model_ids.len(),
            "Endpoint registry initialized"
        );

        Ok(Self {
            endpoints,
            by_model,
            model_ids,
        })
    }

    /// Endpoints serving `model`, in configuration order
    ///
    /// # Errors
    /// `GatewayError::UnknownModel` if no endpoint declares the model.
    pub fn endpoints_for(&self, model: &str) -> Result<Vec<Arc<Endpoint>>, GatewayError> {
        self.by_model
            .get(model)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownModel(model.to_string()))
    }

    /// All resolvable model ids, in first-declared order
    pub fn model_ids(&self) -> &[ModelId] {
        &self.model_ids
    }

    /// All endpoints, in configuration order
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.name() == name)
    }
}
