//! Configuration management for modelgate
//!
//! Parses TOML configuration files and provides typed access to settings.
//! The configuration is loaded once at startup, validated, and then shared
//! read-only (behind an `Arc`) with the gateway core.

use crate::error::{AppError, AppResult};
use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Upper bound for every timeout-style setting, in seconds
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Retry, timeout and health tunables for the gateway core
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Per-attempt upstream timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Overall elapsed-time budget for one retry cycle
    #[serde(default = "default_retry_budget")]
    pub retry_budget_seconds: u64,
    /// Maximum attempts per retry cycle, independent of candidate count
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Consecutive endpoint faults before an endpoint is suspended
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Model to try once when every endpoint of the requested model failed
    #[serde(default)]
    pub fallback_model: Option<String>,
    /// Maximum silence between upstream chunks once a stream is being relayed
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Events buffered between the upstream reader and the downstream body
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_request_timeout() -> u64 {
    60
}

fn default_retry_budget() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    3
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_stream_idle_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_buffer() -> usize {
    32
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            retry_budget_seconds: default_retry_budget(),
            max_attempts: default_max_attempts(),
            failure_threshold: default_failure_threshold(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            fallback_model: None,
            stream_idle_timeout_seconds: default_stream_idle_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_budget(&self) -> Duration {
        Duration::from_secs(self.retry_budget_seconds)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// One backend endpoint descriptor, in configuration order
///
/// Fields are private; descriptors are only built through deserialization and
/// checked by [`Config::validate`], so a loaded descriptor is always valid.
#[derive(Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default)]
    name: Option<String>,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    /// Environment variable holding the API key (read once at load time)
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_weight")]
    weight: u32,
    models: Vec<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Maps a gateway ModelId to the model name this endpoint expects
    #[serde(default)]
    model_map: BTreeMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("weight", &self.weight)
            .field("models", &self.models)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("model_map", &self.model_map)
            .finish()
    }
}

impl EndpointConfig {
    /// Name used for this endpoint in logs, metrics and health tracking
    ///
    /// Falls back to `endpoint-<n>` (1-based position) when no name is configured.
    pub fn resolved_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("endpoint-{}", index + 1))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn model_map(&self) -> &BTreeMap<String, String> {
        &self.model_map
    }

    /// Resolve the credential, reading `api_key_env` from the environment
    ///
    /// Returns `Ok(None)` when the endpoint is configured without credentials.
    pub fn resolve_api_key(&self) -> AppResult<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                AppError::Config(format!(
                    "Environment variable '{}' referenced by api_key_env is not set",
                    var
                ))
            }),
            None => Ok(None),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content).map_err(|source| {
            AppError::ConfigParseFailed {
                path: "<inline>".to_string(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and `from_toml_str()`; call it
    /// explicitly when a `Config` is deserialized by other means.
    pub fn validate(&self) -> AppResult<()> {
        // Endpoint descriptors
        if self.endpoints.is_empty() {
            return Err(AppError::Config(
                "At least one [[endpoints]] entry is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let name = endpoint.resolved_name(index);

            if name.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Endpoint #{} has an empty name",
                    index + 1
                )));
            }
            if !names.insert(name.clone()) {
                return Err(AppError::Config(format!(
                    "Duplicate endpoint name '{}'. Endpoint names must be unique.",
                    name
                )));
            }

            if !endpoint.base_url.starts_with("http://")
                && !endpoint.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "Endpoint '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    name, endpoint.base_url
                )));
            }

            if endpoint.weight == 0 {
                return Err(AppError::Config(format!(
                    "Endpoint '{}' has weight 0. Weight must be a positive integer.",
                    name
                )));
            }

            if endpoint.api_key.is_some() && endpoint.api_key_env.is_some() {
                return Err(AppError::Config(format!(
                    "Endpoint '{}' sets both api_key and api_key_env; use only one",
                    name
                )));
            }

            if endpoint.models.is_empty() {
                return Err(AppError::Config(format!(
                    "Endpoint '{}' does not serve any models. Add at least one entry to `models`.",
                    name
                )));
            }
            if let Some(blank) = endpoint.models.iter().find(|m| m.trim().is_empty()) {
                return Err(AppError::Config(format!(
                    "Endpoint '{}' lists an empty model id ({:?})",
                    name, blank
                )));
            }

            for (header_name, header_value) in &endpoint.headers {
                HeaderName::from_bytes(header_name.as_bytes()).map_err(|_| {
                    AppError::Config(format!(
                        "Endpoint '{}' has invalid header name '{}'",
                        name, header_name
                    ))
                })?;
                HeaderValue::from_str(header_value).map_err(|_| {
                    AppError::Config(format!(
                        "Endpoint '{}' has invalid value for header '{}'",
                        name, header_name
                    ))
                })?;
            }

            for (model, upstream) in &endpoint.model_map {
                if !endpoint.models.contains(model) {
                    return Err(AppError::Config(format!(
                        "Endpoint '{}' maps model '{}' which it does not serve",
                        name, model
                    )));
                }
                if upstream.trim().is_empty() {
                    return Err(AppError::Config(format!(
                        "Endpoint '{}' maps model '{}' to an empty upstream name",
                        name, model
                    )));
                }
            }
        }

        // Gateway tunables
        let gateway = &self.gateway;
        for (field, value) in [
            ("request_timeout_seconds", gateway.request_timeout_seconds),
            ("retry_budget_seconds", gateway.retry_budget_seconds),
            (
                "stream_idle_timeout_seconds",
                gateway.stream_idle_timeout_seconds,
            ),
            ("connect_timeout_seconds", gateway.connect_timeout_seconds),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "gateway.{} must be greater than 0",
                    field
                )));
            }
            if value > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "gateway.{} cannot exceed {} seconds, got {}",
                    field, MAX_TIMEOUT_SECONDS, value
                )));
            }
        }

        if gateway.max_attempts == 0 {
            return Err(AppError::Config(
                "gateway.max_attempts must be at least 1".to_string(),
            ));
        }
        if gateway.failure_threshold == 0 {
            return Err(AppError::Config(
                "gateway.failure_threshold must be at least 1".to_string(),
            ));
        }
        if gateway.backoff_base_ms == 0 {
            return Err(AppError::Config(
                "gateway.backoff_base_ms must be greater than 0".to_string(),
            ));
        }
        if gateway.backoff_cap_ms < gateway.backoff_base_ms {
            return Err(AppError::Config(format!(
                "gateway.backoff_cap_ms ({}) must be >= gateway.backoff_base_ms ({})",
                gateway.backoff_cap_ms, gateway.backoff_base_ms
            )));
        }
        if gateway.stream_buffer == 0 {
            return Err(AppError::Config(
                "gateway.stream_buffer must be at least 1".to_string(),
            ));
        }

        if let Some(fallback) = &gateway.fallback_model {
            let served = self
                .endpoints
                .iter()
                .any(|e| e.models.iter().any(|m| m == fallback));
            if !served {
                return Err(AppError::Config(format!(
                    "gateway.fallback_model '{}' is not served by any endpoint",
                    fallback
                )));
            }
        }

        Ok(())
    }
}
