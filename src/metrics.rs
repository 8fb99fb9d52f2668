//! Prometheus metrics collection for modelgate
//!
//! This module provides metrics instrumentation for tracking:
//! - Request outcomes and end-to-end latency
//! - Per-endpoint attempt outcomes, failovers and fallback hops
//! - Endpoint suspensions and mid-stream failures
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use crate::gateway::AttemptOutcome;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final outcome of an inbound request, as a bounded label set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    /// Upstream rejected the request (4xx), relayed to the caller
    ClientError,
    /// Every permitted attempt failed
    Exhausted,
    UnknownModel,
    NoEndpoints,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Succeeded => "succeeded",
            RequestOutcome::ClientError => "client_error",
            RequestOutcome::Exhausted => "exhausted",
            RequestOutcome::UnknownModel => "unknown_model",
            RequestOutcome::NoEndpoints => "no_endpoints",
        }
    }
}

/// Response delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Buffered,
    Stream,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Buffered => "buffered",
            DeliveryMode::Stream => "stream",
        }
    }
}

/// Metrics collector for modelgate
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    upstream_attempts: IntCounterVec,
    failovers: IntCounter,
    fallback_hops: IntCounter,
    endpoint_suspensions: IntCounterVec,
    mid_stream_failures: IntCounterVec,
    request_duration: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 5 outcomes
        let requests_total = IntCounterVec::new(
            Opts::new(
                "modelgate_requests_total",
                "Total number of chat completion requests by final outcome",
            ),
            &["outcome"],
        )?;

        // Cardinality: N endpoints x 5 outcomes (endpoint names come from config)
        let upstream_attempts = IntCounterVec::new(
            Opts::new(
                "modelgate_upstream_attempts_total",
                "Total number of upstream attempts by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;

        let failovers = IntCounter::with_opts(Opts::new(
            "modelgate_failovers_total",
            "Total number of moves to the next candidate endpoint after a failed attempt",
        ))?;

        let fallback_hops = IntCounter::with_opts(Opts::new(
            "modelgate_fallback_hops_total",
            "Total number of requests rerouted to the configured fallback model",
        ))?;

        let endpoint_suspensions = IntCounterVec::new(
            Opts::new(
                "modelgate_endpoint_suspensions_total",
                "Total number of times an endpoint entered or extended a suspension window",
            ),
            &["endpoint"],
        )?;

        // Counted separately from attempts: the stream was already committed
        // to the caller when these happened, so they were never retried.
        let mid_stream_failures = IntCounterVec::new(
            Opts::new(
                "modelgate_mid_stream_failures_total",
                "Total number of streams cut short after output was delivered, by endpoint",
            ),
            &["endpoint"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "modelgate_request_duration_seconds",
                "Time from request receipt to response (first byte for streams)",
            )
            .buckets(vec![
                0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["mode"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(upstream_attempts.clone()))?;
        registry.register(Box::new(failovers.clone()))?;
        registry.register(Box::new(fallback_hops.clone()))?;
        registry.register(Box::new(endpoint_suspensions.clone()))?;
        registry.register(Box::new(mid_stream_failures.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            upstream_attempts,
            failovers,
            fallback_hops,
            endpoint_suspensions,
            mid_stream_failures,
            request_duration,
        })
    }

    pub fn record_request(&self, outcome: RequestOutcome) {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record the outcome of one upstream attempt
    pub fn record_attempt(&self, endpoint: &str, outcome: AttemptOutcome) {
        self.upstream_attempts
            .with_label_values(&[endpoint, outcome.as_str()])
            .inc();
    }

    pub fn record_failover(&self) {
        self.failovers.inc();
    }

    pub fn record_fallback_hop(&self) {
        self.fallback_hops.inc();
    }

    pub fn record_suspension(&self, endpoint: &str) {
        self.endpoint_suspensions
            .with_label_values(&[endpoint])
            .inc();
    }

    /// Record a stream that failed after its first event was relayed
    pub fn record_mid_stream_failure(&self, endpoint: &str) {
        self.mid_stream_failures
            .with_label_values(&[endpoint])
            .inc();
    }

    /// Observe request latency in seconds
    ///
    /// # Errors
    ///
    /// NaN, infinite and negative values are rejected: they corrupt histogram
    /// percentiles.
    pub fn observe_duration(
        &self,
        mode: DeliveryMode,
        seconds: f64,
    ) -> Result<(), prometheus::Error> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                seconds
            )));
        }
        self.request_duration
            .with_label_values(&[mode.as_str()])
            .observe(seconds);
        Ok(())
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        tracing::debug!(
            metric_family_count = metric_families.len(),
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(error = %e, "Prometheus text encoder failed");
                e
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Prometheus encoder produced invalid UTF-8 at byte {}",
                e.utf8_error().valid_up_to()
            ))
        })
    }
}
