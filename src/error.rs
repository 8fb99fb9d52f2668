//! Error types for modelgate
//!
//! Two layers of errors live here:
//! - [`GatewayError`] is the taxonomy surfaced by the retry/failover controller.
//! - [`AppError`] wraps it together with configuration and request validation
//!   failures, and implements `IntoResponse` for Axum handlers.
//!
//! Per-attempt forwarding failures are [`crate::upstream::ForwardError`]; they are
//! absorbed by the controller and only appear in logs.

use axum::{
    Json,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;

use crate::handlers::openai::extractor::OpenAiError;

/// Errors surfaced by the gateway core to its caller
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Model '{0}' is not served by any configured endpoint")]
    UnknownModel(String),

    #[error("No endpoints available for model '{0}'")]
    NoEndpointsConfigured(String),

    #[error("Request to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionError { endpoint: String, reason: String },

    /// Caller fault reported by an upstream (4xx). Relayed verbatim, never retried.
    #[error("Upstream {endpoint} rejected the request with status {status}")]
    UpstreamClientError {
        endpoint: String,
        status: StatusCode,
        body: Bytes,
        content_type: Option<HeaderValue>,
    },

    #[error("Upstream {endpoint} failed with status {status}")]
    UpstreamServerError { endpoint: String, status: StatusCode },

    #[error("Stream from {endpoint} terminated after {events_relayed} events: {reason}")]
    PartialStreamFailure {
        endpoint: String,
        events_relayed: usize,
        reason: String,
    },

    #[error("All endpoints failed for model '{model}' after {attempts} attempts")]
    AllEndpointsFailed { model: String, attempts: usize },
}

impl GatewayError {
    /// HTTP status used when this error is surfaced to a client
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownModel(_) => StatusCode::NOT_FOUND,
            Self::NoEndpointsConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ConnectionError { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamClientError { status, .. } => *status,
            Self::UpstreamServerError { .. } => StatusCode::BAD_GATEWAY,
            Self::PartialStreamFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::AllEndpointsFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// OpenAI-style error `type` for gateway-generated bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnknownModel(_) => "invalid_request_error",
            Self::NoEndpointsConfigured(_) => "service_unavailable",
            Self::Timeout { .. } => "upstream_timeout",
            Self::ConnectionError { .. } | Self::UpstreamServerError { .. } => "upstream_error",
            Self::UpstreamClientError { .. } => "invalid_request_error",
            Self::PartialStreamFailure { .. } => "partial_stream_failure",
            Self::AllEndpointsFailed { .. } => "all_endpoints_failed",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::UpstreamClientError {
                body, content_type, ..
            } => {
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                if let Some(content_type) = content_type {
                    response
                        .headers_mut()
                        .insert(header::CONTENT_TYPE, content_type);
                }
                response
            }
            other => {
                let mut error = OpenAiError::new(other.to_string(), other.error_type());
                if let Self::UnknownModel(_) = other {
                    error.error.code = Some("model_not_found".to_string());
                    error.error.param = Some("model".to_string());
                }
                (status, Json(error)).into_response()
            }
        }
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::Gateway(err) => return err.into_response(),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, OpenAiError::invalid_request(msg)),
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                OpenAiError::server_error(self.to_string()),
            ),
        };

        (status, Json(error)).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
