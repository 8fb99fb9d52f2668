//! Retry/failover controller
//!
//! [`Gateway::complete`] drives one inbound request through
//! `Selecting -> Attempting -> {Succeeded, Retrying, Exhausted, NonRetryable}`:
//!
//! - Candidates come from the weighted selector, one fresh ordering per request.
//! - Endpoint faults (timeout, connection error, 5xx) are recorded against
//!   health and the next candidate is tried, while the attempt cap and the
//!   elapsed-time budget allow.
//! - An upstream 4xx is the caller's fault: relayed as-is, never retried.
//! - On exhaustion, one hop to the configured fallback model is made; the hop
//!   never chains.
//!
//! Exactly one endpoint is active per request at any instant: attempts run
//! strictly one after another.

pub mod attempt;
pub mod relay;
pub mod sse;

pub use attempt::{AttemptOutcome, AttemptRecord};
pub use relay::StreamSession;

use crate::config::{Config, GatewayConfig};
use crate::error::{AppResult, GatewayError};
use crate::handlers::openai::types::InboundRequest;
use crate::metrics::{DeliveryMode, Metrics, RequestOutcome};
use crate::middleware::request_id::RequestId;
use crate::models::{
    Endpoint, EndpointName, EndpointRegistry, HealthPolicy, HealthTracker, WeightedSelector,
};
use crate::upstream::{ForwardError, HttpForwarder, Upstream};
use futures::StreamExt;
use relay::RelayContext;
use serde_json::Value;
use sse::{SseEvents, is_comment_only};
use std::sync::Arc;
use tokio::time::Instant;

/// Successful result of [`Gateway::complete`]
#[derive(Debug)]
pub enum GatewayResponse {
    /// Complete upstream JSON object, unchanged
    Buffered(Value),
    /// Committed event stream
    Stream(StreamSession),
}

/// How a single retry cycle ended without a response
enum CycleEnd {
    /// Every permitted attempt failed with an endpoint fault
    Exhausted,
    /// Surface this error without further attempts
    NonRetryable(GatewayError),
}

/// Gateway core: registry, health, selection and forwarding wired together
pub struct Gateway {
    registry: Arc<EndpointRegistry>,
    health: Arc<HealthTracker>,
    selector: WeightedSelector,
    upstream: Arc<dyn Upstream>,
    config: GatewayConfig,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        upstream: Arc<dyn Upstream>,
        config: GatewayConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new(
            &registry,
            HealthPolicy::from_config(&config),
            Arc::clone(&metrics),
        ));
        let selector = WeightedSelector::new(Arc::clone(&registry), Arc::clone(&health));
        Self {
            registry,
            health,
            selector,
            upstream,
            config,
            metrics,
        }
    }

    /// Build the gateway with the HTTP forwarder from a validated config
    ///
    /// # Errors
    /// Fails if credentials cannot be resolved or the HTTP client cannot be built.
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> AppResult<Self> {
        let registry = Arc::new(EndpointRegistry::from_config(config)?);
        let forwarder = HttpForwarder::from_config(&config.gateway)?;
        Ok(Self::new(
            registry,
            Arc::new(forwarder),
            config.gateway.clone(),
            metrics,
        ))
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve one request
    ///
    /// # Errors
    /// - `UnknownModel` if no endpoint serves the requested model
    /// - `NoEndpointsConfigured` if the candidate list is empty
    /// - `UpstreamClientError` if an upstream rejected the request (4xx)
    /// - `AllEndpointsFailed` once every permitted attempt failed
    pub async fn complete(
        &self,
        request: InboundRequest,
        request_id: RequestId,
    ) -> Result<GatewayResponse, GatewayError> {
        let started = Instant::now();
        let mut attempts = Vec::new();

        let mut result = self
            .run_cycle(&request, request.model(), request_id, &mut attempts)
            .await;

        if matches!(result, Err(CycleEnd::Exhausted))
            && let Some(fallback) = self
                .config
                .fallback_model
                .as_deref()
                .filter(|f| *f != request.model())
        {
            self.metrics.record_fallback_hop();
            tracing::warn!(
                request_id = %request_id,
                model = %request.model(),
                fallback_model = %fallback,
                attempts = attempts.len(),
                "All candidates failed, trying fallback model"
            );
            result = self
                .run_cycle(&request, fallback, request_id, &mut attempts)
                .await;
        }

        let result = result.map_err(|end| match end {
            CycleEnd::NonRetryable(err) => err,
            CycleEnd::Exhausted => GatewayError::AllEndpointsFailed {
                model: request.model().to_string(),
                attempts: attempts.len(),
            },
        });

        match &result {
            Ok(_) => {
                self.metrics.record_request(RequestOutcome::Succeeded);
                let mode = if request.is_stream() {
                    DeliveryMode::Stream
                } else {
                    DeliveryMode::Buffered
                };
                if let Err(e) = self
                    .metrics
                    .observe_duration(mode, started.elapsed().as_secs_f64())
                {
                    tracing::warn!(error = %e, "Failed to record request duration");
                }
            }
            Err(err) => {
                self.metrics.record_request(request_outcome(err));
                if let GatewayError::AllEndpointsFailed { .. } = err {
                    tracing::error!(
                        request_id = %request_id,
                        model = %request.model(),
                        attempts = %attempt::summarize(&attempts),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "All endpoints failed"
                    );
                }
            }
        }

        result
    }

    /// One `Selecting -> Attempting` pass over the candidates for `model`
    async fn run_cycle(
        &self,
        request: &InboundRequest,
        model: &str,
        request_id: RequestId,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<GatewayResponse, CycleEnd> {
        let candidates = self
            .selector
            .select(model)
            .await
            .map_err(CycleEnd::NonRetryable)?;
        if candidates.is_empty() {
            return Err(CycleEnd::NonRetryable(
                GatewayError::NoEndpointsConfigured(model.to_string()),
            ));
        }

        tracing::debug!(
            request_id = %request_id,
            model = %model,
            candidates = ?candidates.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "Candidates selected"
        );

        let max_attempts = self.config.max_attempts.max(1);
        let budget = self.config.retry_budget();
        let cycle_start = Instant::now();

        for (index, endpoint) in candidates.iter().take(max_attempts).enumerate() {
            if index > 0 {
                if cycle_start.elapsed() >= budget {
                    tracing::warn!(
                        request_id = %request_id,
                        model = %model,
                        budget_ms = budget.as_millis() as u64,
                        "Retry budget exhausted"
                    );
                    break;
                }
                self.metrics.record_failover();
            }

            let attempt_start = Instant::now();
            let result = self.attempt(endpoint, request, model, request_id).await;
            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) => e.outcome(),
            };

            attempts.push(AttemptRecord::new(
                EndpointName::from(endpoint.as_ref()),
                attempt_start,
                outcome,
            ));
            self.metrics.record_attempt(endpoint.name(), outcome);
            if let Err(e) = self.health.record(endpoint.name(), outcome).await {
                tracing::warn!(error = %e, "Failed to record endpoint health");
            }

            let (err, upstream_body) = match result {
                Ok(response) => {
                    tracing::debug!(
                        request_id = %request_id,
                        endpoint_name = %endpoint.name(),
                        model = %model,
                        attempt = index + 1,
                        elapsed_ms = attempt_start.elapsed().as_millis() as u64,
                        "Upstream attempt succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let excerpt = e.body_excerpt();
                    (e.into_gateway_error(endpoint.name()), excerpt)
                }
            };

            if outcome == AttemptOutcome::ClientError {
                tracing::info!(
                    request_id = %request_id,
                    endpoint_name = %endpoint.name(),
                    model = %model,
                    error = %err,
                    "Upstream rejected request, relaying without retry"
                );
                return Err(CycleEnd::NonRetryable(err));
            }

            tracing::warn!(
                request_id = %request_id,
                endpoint_name = %endpoint.name(),
                model = %model,
                attempt = index + 1,
                max_attempts,
                outcome = %outcome,
                elapsed_ms = attempt_start.elapsed().as_millis() as u64,
                error = %err,
                upstream_body = upstream_body.as_deref().unwrap_or(""),
                "Upstream attempt failed"
            );
        }

        Err(CycleEnd::Exhausted)
    }

    /// Forward to one endpoint
    ///
    /// A streaming attempt only succeeds once its first data event arrived;
    /// anything that goes wrong before that is an ordinary attempt failure.
    async fn attempt(
        &self,
        endpoint: &Arc<Endpoint>,
        request: &InboundRequest,
        model: &str,
        request_id: RequestId,
    ) -> Result<GatewayResponse, ForwardError> {
        let body = request.to_upstream_body(endpoint.upstream_model(model));
        let timeout = self.config.request_timeout();
        // Bounds the transport as well, whatever the `Upstream` does with it
        let deadline = Instant::now() + timeout;
        let timed_out = |_| ForwardError::Timeout(timeout);

        if !request.is_stream() {
            let value = tokio::time::timeout_at(
                deadline,
                self.upstream.forward_buffered(endpoint, &body, timeout),
            )
            .await
            .map_err(timed_out)??;
            return Ok(GatewayResponse::Buffered(value));
        }

        let stream =
            tokio::time::timeout_at(deadline, self.upstream.open_stream(endpoint, &body, timeout))
                .await
                .map_err(timed_out)??;
        let mut events = SseEvents::new(stream);

        let mut prelude = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Err(_) => return Err(ForwardError::Timeout(timeout)),
                Ok(None) => {
                    return Err(ForwardError::Connection(
                        "upstream closed the stream before the first event".to_string(),
                    ));
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(event))) => {
                    let commit = !is_comment_only(&event);
                    prelude.push(event);
                    if commit {
                        break;
                    }
                }
            }
        }

        let session = relay::spawn_relay(
            RelayContext {
                endpoint: EndpointName::from(endpoint.as_ref()),
                request_id,
                health: Arc::clone(&self.health),
                metrics: Arc::clone(&self.metrics),
                idle_timeout: self.config.stream_idle_timeout(),
                buffer: self.config.stream_buffer,
            },
            prelude,
            events,
        );
        Ok(GatewayResponse::Stream(session))
    }
}

fn request_outcome(err: &GatewayError) -> RequestOutcome {
    match err {
        GatewayError::UnknownModel(_) => RequestOutcome::UnknownModel,
        GatewayError::NoEndpointsConfigured(_) => RequestOutcome::NoEndpoints,
        GatewayError::UpstreamClientError { .. } => RequestOutcome::ClientError,
        _ => RequestOutcome::Exhausted,
    }
}
