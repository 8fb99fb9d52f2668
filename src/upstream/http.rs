//! reqwest-backed upstream transport

use super::{ByteStream, ForwardError, Upstream};
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::models::Endpoint;
use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Forwards requests over HTTP with a single pooled client
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// Build the shared client
    ///
    /// Only the connect timeout lives on the client; total timeouts are
    /// applied per request so streaming responses are not cut off.
    pub fn new(connect_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &GatewayConfig) -> AppResult<Self> {
        Self::new(config.connect_timeout())
    }

    fn request(&self, endpoint: &Endpoint, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(endpoint.chat_completions_url())
            .headers(endpoint.headers().clone())
            .json(body);
        if let Some(credential) = endpoint.credential() {
            request = request.header(AUTHORIZATION, credential.bearer());
        }
        request
    }

    /// Turn a non-2xx response into the matching error, keeping its whole body
    ///
    /// The body read shares the attempt deadline; an upstream that stalls or
    /// drops the connection mid-body is an endpoint fault, not an empty body.
    async fn reject(
        response: reqwest::Response,
        deadline: Instant,
        timeout: Duration,
    ) -> ForwardError {
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        match tokio::time::timeout_at(deadline, response.bytes()).await {
            Ok(Ok(body)) => ForwardError::from_status(status, body, content_type),
            Ok(Err(e)) => classify(e, timeout),
            Err(_) => ForwardError::Timeout(timeout),
        }
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ForwardError {
    if err.is_timeout() {
        ForwardError::Timeout(timeout)
    } else if err.is_decode() {
        ForwardError::InvalidResponse(err.to_string())
    } else {
        ForwardError::Connection(err.to_string())
    }
}

#[async_trait]
impl Upstream for HttpForwarder {
    async fn forward_buffered(
        &self,
        endpoint: &Endpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ForwardError> {
        let deadline = Instant::now() + timeout;
        let response = self
            .request(endpoint, body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        if !response.status().is_success() {
            return Err(Self::reject(response, deadline, timeout).await);
        }

        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ForwardError::InvalidResponse(format!("completion body is not JSON: {}", e))
        })
    }

    async fn open_stream(
        &self,
        endpoint: &Endpoint,
        body: &Value,
        timeout: Duration,
    ) -> Result<ByteStream, ForwardError> {
        let deadline = Instant::now() + timeout;
        let response = tokio::time::timeout_at(deadline, self.request(endpoint, body).send())
            .await
            .map_err(|_| ForwardError::Timeout(timeout))?
            .map_err(|e| classify(e, timeout))?;

        if !response.status().is_success() {
            return Err(Self::reject(response, deadline, timeout).await);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ForwardError::Connection(e.to_string())));
        Ok(Box::pin(stream) as ByteStream)
    }
}
