//! HTTP request handlers for the modelgate API

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::gateway::Gateway;
use crate::metrics::Metrics;
use crate::middleware::request_id::request_id_middleware;
use crate::models::EndpointRegistry;
use crate::upstream::Upstream;
use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod metrics;
pub mod openai;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    gateway: Arc<Gateway>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create the state with the HTTP forwarder
    ///
    /// # Errors
    /// Fails if metrics registration, credential resolution or HTTP client
    /// construction fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);
        let gateway = Arc::new(Gateway::from_config(&config, Arc::clone(&metrics))?);
        Ok(Self {
            config,
            gateway,
            metrics,
        })
    }

    /// Create the state with a caller-supplied upstream transport
    pub fn with_upstream(config: Arc<Config>, upstream: Arc<dyn Upstream>) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);
        let registry = Arc::new(EndpointRegistry::from_config(&config)?);
        let gateway = Arc::new(Gateway::new(
            registry,
            upstream,
            config.gateway.clone(),
            Arc::clone(&metrics),
        ));
        Ok(Self {
            config,
            gateway,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(openai::completions::handler),
        )
        .route("/v1/models", get(openai::models::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
