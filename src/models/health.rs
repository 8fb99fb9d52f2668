//! Passive health tracking for upstream endpoints
//!
//! Health is derived from real request outcomes reported by the failover
//! controller; there is no probing. Endpoints that fail `failure_threshold`
//! consecutive times are suspended for an exponentially growing backoff window
//! and excluded from selection until the window elapses.
//!
//! Timestamps use `tokio::time::Instant` so tests can drive the clock with
//! `tokio::time::pause()` / `advance()`.

use crate::config::GatewayConfig;
use crate::gateway::AttemptOutcome;
use crate::metrics::Metrics;
use crate::models::endpoint_name::EndpointName;
use crate::models::registry::{Endpoint, EndpointRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Errors from health tracking operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

/// Suspension policy: threshold and exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    failure_threshold: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl HealthPolicy {
    pub fn new(failure_threshold: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            backoff_base,
            backoff_cap: backoff_cap.max(backoff_base),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.backoff_base(),
            config.backoff_cap(),
        )
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Suspension length after `consecutive_failures` faults
    ///
    /// `base * 2^(consecutive_failures - threshold)`, capped. Returns `None`
    /// while the threshold has not been reached.
    ///
    /// With base=1s, cap=60s, threshold=3:
    /// - failure 3: 1s
    /// - failure 4: 2s
    /// - failure 5: 4s
    /// - failure 9+: 60s (capped)
    pub fn backoff_for(&self, consecutive_failures: u32) -> Option<Duration> {
        if consecutive_failures < self.failure_threshold {
            return None;
        }
        let exponent = consecutive_failures - self.failure_threshold;
        let factor = 2_u32.saturating_pow(exponent);
        Some(self.backoff_base.saturating_mul(factor).min(self.backoff_cap))
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Health status for a single endpoint
///
/// All fields are private; state only changes through [`HealthTracker::record`].
#[derive(Clone, Debug)]
pub struct EndpointHealth {
    name: EndpointName,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    suspended_until: Option<Instant>,
}

impl EndpointHealth {
    fn new(name: EndpointName) -> Self {
        Self {
            name,
            consecutive_failures: 0,
            last_failure: None,
            suspended_until: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn suspended_until(&self) -> Option<Instant> {
        self.suspended_until
    }

    /// Selectable at `now`; becomes selectable again exactly at `suspended_until`
    pub fn is_available_at(&self, now: Instant) -> bool {
        match self.suspended_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Tracks per-endpoint health from reported request outcomes
///
/// Every mutation takes the write lock, so concurrent increments and resets
/// are serialized and never lost.
#[derive(Debug)]
pub struct HealthTracker {
    health_status: RwLock<HashMap<EndpointName, EndpointHealth>>,
    order: Vec<EndpointName>,
    policy: HealthPolicy,
    metrics: Arc<Metrics>,
}

impl HealthTracker {
    /// Create a tracker with every registered endpoint starting available
    pub fn new(registry: &EndpointRegistry, policy: HealthPolicy, metrics: Arc<Metrics>) -> Self {
        let order: Vec<EndpointName> = registry
            .endpoints()
            .iter()
            .map(|e| EndpointName::from(e.as_ref()))
            .collect();
        let health_status = order
            .iter()
            .map(|name| (name.clone(), EndpointHealth::new(name.clone())))
            .collect::<HashMap<_, _>>();

        tracing::info!(
            total_endpoints = health_status.len(),
            failure_threshold = policy.failure_threshold(),
            "HealthTracker initialized with all endpoints available"
        );

        Self {
            health_status: RwLock::new(health_status),
            order,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Check if an endpoint is currently selectable
    ///
    /// Unknown endpoints are reported unavailable.
    pub async fn is_available(&self, endpoint_name: &str) -> bool {
        self.is_available_at(endpoint_name, Instant::now()).await
    }

    pub async fn is_available_at(&self, endpoint_name: &str, now: Instant) -> bool {
        let status = self.health_status.read().await;
        status
            .get(endpoint_name)
            .map(|h| h.is_available_at(now))
            .unwrap_or(false)
    }

    /// Filter `candidates` to the available ones under a single read lock
    pub async fn available(&self, candidates: &[Arc<Endpoint>]) -> Vec<Arc<Endpoint>> {
        let now = Instant::now();
        let status = self.health_status.read().await;
        candidates
            .iter()
            .filter(|e| {
                status
                    .get(e.name())
                    .map(|h| h.is_available_at(now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Record the outcome of one attempt against `endpoint_name`
    ///
    /// - `Success` resets the failure count and clears any suspension.
    /// - `Timeout`, `ConnectionError` and `ServerError` count as endpoint faults.
    /// - `ClientError` is a caller fault and leaves health untouched.
    pub async fn record(
        &self,
        endpoint_name: &str,
        outcome: AttemptOutcome,
    ) -> Result<(), HealthError> {
        let now = Instant::now();
        let mut status = self.health_status.write().await;
        let health = status.get_mut(endpoint_name).ok_or_else(|| {
            tracing::warn!(
                endpoint_name = %endpoint_name,
                "Attempted to record outcome for unknown endpoint"
            );
            HealthError::UnknownEndpoint(endpoint_name.to_string())
        })?;

        match outcome {
            AttemptOutcome::Success => {
                let was_suspended = health.suspended_until.is_some();
                health.consecutive_failures = 0;
                health.suspended_until = None;
                if was_suspended {
                    tracing::info!(
                        endpoint_name = %endpoint_name,
                        "Endpoint recovered, suspension cleared"
                    );
                }
            }
            AttemptOutcome::ClientError => {
                tracing::debug!(
                    endpoint_name = %endpoint_name,
                    "Client error does not affect endpoint health"
                );
            }
            AttemptOutcome::Timeout
            | AttemptOutcome::ConnectionError
            | AttemptOutcome::ServerError => {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_failure = Some(now);

                match self.policy.backoff_for(health.consecutive_failures) {
                    Some(backoff) => {
                        health.suspended_until = Some(now + backoff);
                        self.metrics.record_suspension(endpoint_name);
                        tracing::warn!(
                            endpoint_name = %endpoint_name,
                            consecutive_failures = health.consecutive_failures,
                            backoff_ms = backoff.as_millis() as u64,
                            outcome = %outcome,
                            "Endpoint suspended"
                        );
                    }
                    None => {
                        tracing::debug!(
                            endpoint_name = %endpoint_name,
                            consecutive_failures = health.consecutive_failures,
                            outcome = %outcome,
                            "Endpoint failure recorded (still available)"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Get all health statuses in registry order, for display/debugging
    pub async fn snapshot(&self) -> Vec<EndpointHealth> {
        let status = self.health_status.read().await;
        self.order
            .iter()
            .filter_map(|name| status.get(name).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn create_tracker(policy: HealthPolicy) -> HealthTracker {
        let config = Config::from_toml_str(
            r#"
[server]

[[endpoints]]
name = "e1"
base_url = "http://localhost:1234/v1"
models = ["m"]

[[endpoints]]
name = "e2"
base_url = "http://localhost:1235/v1"
models = ["m"]
"#,
        )
        .unwrap();
        let registry = EndpointRegistry::from_config(&config).unwrap();
        HealthTracker::new(&registry, policy, Arc::new(Metrics::new().unwrap()))
    }

    fn default_policy() -> HealthPolicy {
        HealthPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = default_policy();
        assert_eq!(policy.backoff_for(0), None);
        assert_eq!(policy.backoff_for(2), None);
        assert_eq!(policy.backoff_for(3), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff_for(4), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_for(5), Some(Duration::from_secs(4)));
        assert_eq!(policy.backoff_for(9), Some(Duration::from_secs(60)));
        assert_eq!(policy.backoff_for(u32::MAX), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_all_endpoints_start_available() {
        let tracker = create_tracker(default_policy());
        assert!(tracker.is_available("e1").await);
        assert!(tracker.is_available("e2").await);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_unavailable_and_errors() {
        let tracker = create_tracker(default_policy());
        assert!(!tracker.is_available("nope").await);
        assert_eq!(
            tracker.record("nope", AttemptOutcome::ServerError).await,
            Err(HealthError::UnknownEndpoint("nope".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_failures_suspend() {
        let tracker = create_tracker(default_policy());

        tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        tracker.record("e1", AttemptOutcome::Timeout).await.unwrap();
        assert!(tracker.is_available("e1").await);

        tracker
            .record("e1", AttemptOutcome::ConnectionError)
            .await
            .unwrap();
        assert!(!tracker.is_available("e1").await);
        assert!(tracker.is_available("e2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_exactly_at_suspended_until() {
        let tracker = create_tracker(default_policy());
        for _ in 0..3 {
            tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        }

        let until = tracker.snapshot().await[0].suspended_until().unwrap();
        assert!(!tracker.is_available_at("e1", until - Duration::from_millis(1)).await);
        assert!(tracker.is_available_at("e1", until).await);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_affect_health() {
        let tracker = create_tracker(default_policy());
        for _ in 0..10 {
            tracker.record("e1", AttemptOutcome::ClientError).await.unwrap();
        }
        assert!(tracker.is_available("e1").await);
        assert_eq!(tracker.snapshot().await[0].consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_client_error_does_not_reset_failure_streak() {
        let tracker = create_tracker(default_policy());
        tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        tracker.record("e1", AttemptOutcome::ClientError).await.unwrap();
        assert_eq!(tracker.snapshot().await[0].consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_and_clears_suspension() {
        let tracker = create_tracker(default_policy());
        for _ in 0..3 {
            tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        }
        assert!(!tracker.is_available("e1").await);

        tracker.record("e1", AttemptOutcome::Success).await.unwrap();
        assert!(tracker.is_available("e1").await);
        let e1 = &tracker.snapshot().await[0];
        assert_eq!(e1.consecutive_failures(), 0);
        assert!(e1.suspended_until().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_suspension_extends_backoff() {
        let tracker = create_tracker(default_policy());
        for _ in 0..3 {
            tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(tracker.is_available("e1").await);

        // Fourth consecutive fault doubles the window
        tracker.record("e1", AttemptOutcome::ServerError).await.unwrap();
        let now = Instant::now();
        let until = tracker.snapshot().await[0].suspended_until().unwrap();
        assert_eq!(until - now, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_snapshot_in_registry_order() {
        let tracker = create_tracker(default_policy());
        let names: Vec<_> = tracker
            .snapshot()
            .await
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["e1", "e2"]);
    }
}
