//! Request forwarding to upstream inference endpoints
//!
//! [`Upstream`] is the capability set the failover controller needs from a
//! backend: one buffered call and one streaming call. Endpoints are data
//! (URL, credential, headers), so new backends are added through
//! configuration; a new `Upstream` implementation is only needed for a new
//! transport (tests use in-memory ones).

mod http;

pub use http::HttpForwarder;

use crate::error::GatewayError;
use crate::gateway::AttemptOutcome;
use crate::models::Endpoint;
use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// How much of an upstream error body goes into log lines
const LOG_BODY_EXCERPT_BYTES: usize = 512;

/// Raw upstream response body, as delivered by the network
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ForwardError>> + Send>>;

/// Failure of a single forwarding attempt
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    /// Upstream answered 4xx; body and content type are kept for verbatim relay
    #[error("upstream rejected request with status {status}")]
    ClientError {
        status: StatusCode,
        body: Bytes,
        content_type: Option<HeaderValue>,
    },

    #[error("upstream failed with status {status}")]
    ServerError { status: StatusCode, body: Bytes },

    #[error("upstream returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl ForwardError {
    /// Classify this failure for health tracking and retry decisions
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Timeout(_) => AttemptOutcome::Timeout,
            Self::Connection(_) => AttemptOutcome::ConnectionError,
            Self::ClientError { .. } => AttemptOutcome::ClientError,
            Self::ServerError { .. } | Self::InvalidResponse(_) => AttemptOutcome::ServerError,
        }
    }

    /// Leading part of the upstream error body for logging, if there is one
    ///
    /// Only logs are capped; relayed 4xx bodies stay whole.
    pub fn body_excerpt(&self) -> Option<String> {
        let body = match self {
            Self::ClientError { body, .. } | Self::ServerError { body, .. } => body,
            _ => return None,
        };
        if body.is_empty() {
            return None;
        }
        let end = body.len().min(LOG_BODY_EXCERPT_BYTES);
        Some(String::from_utf8_lossy(&body[..end]).into_owned())
    }

    /// Attribute this failure to `endpoint` in the surfaced error taxonomy
    pub fn into_gateway_error(self, endpoint: &str) -> GatewayError {
        let endpoint = endpoint.to_string();
        match self {
            Self::Timeout(timeout) => GatewayError::Timeout {
                endpoint,
                timeout_ms: timeout.as_millis() as u64,
            },
            Self::Connection(reason) => GatewayError::ConnectionError { endpoint, reason },
            Self::ClientError {
                status,
                body,
                content_type,
            } => GatewayError::UpstreamClientError {
                endpoint,
                status,
                body,
                content_type,
            },
            Self::ServerError { status, .. } => GatewayError::UpstreamServerError { endpoint, status },
            Self::InvalidResponse(reason) => GatewayError::ConnectionError {
                endpoint,
                reason: format!("unusable response: {}", reason),
            },
        }
    }

    /// Map an upstream non-success status to the matching error
    pub fn from_status(status: StatusCode, body: Bytes, content_type: Option<HeaderValue>) -> Self {
        if status.is_client_error() {
            Self::ClientError {
                status,
                body,
                content_type,
            }
        } else {
            Self::ServerError { status, body }
        }
    }
}

/// Capability set of an upstream transport
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `body` and return the parsed JSON completion object unchanged
    ///
    /// The whole exchange is bounded by `timeout`.
    async fn forward_buffered(
        &self,
        endpoint: &Endpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ForwardError>;

    /// Send `body` and return the live response body once a 2xx status arrived
    ///
    /// `timeout` bounds the wait for the response headers and, on a non-2xx
    /// status, for the error body; the returned stream itself is unbounded.
    async fn open_stream(
        &self,
        endpoint: &Endpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<ByteStream, ForwardError>;
}
