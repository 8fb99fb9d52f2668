//! Weighted candidate ordering for a model
//!
//! Produces the full fallback chain for one request: weighted random sampling
//! without replacement over the available endpoints serving the model.
//! The first entry is the weighted-random primary; every available endpoint
//! appears exactly once.

use crate::error::GatewayError;
use crate::models::health::HealthTracker;
use crate::models::registry::{Endpoint, EndpointRegistry};
use rand::Rng;
use std::sync::Arc;

/// Orders candidate endpoints for a model using weights and health
#[derive(Debug)]
pub struct WeightedSelector {
    registry: Arc<EndpointRegistry>,
    health: Arc<HealthTracker>,
}

impl WeightedSelector {
    pub fn new(registry: Arc<EndpointRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Ordered candidates for `model` using the thread-local RNG
    ///
    /// Each call is independent: no session affinity.
    pub async fn select(&self, model: &str) -> Result<Vec<Arc<Endpoint>>, GatewayError> {
        let pool = self.candidate_pool(model).await?;
        let mut rng = rand::rng();
        Ok(weighted_order(pool, &mut rng))
    }

    /// Same as [`select`](Self::select) with a caller-supplied RNG
    pub async fn select_with_rng<R: Rng>(
        &self,
        model: &str,
        rng: &mut R,
    ) -> Result<Vec<Arc<Endpoint>>, GatewayError> {
        let pool = self.candidate_pool(model).await?;
        Ok(weighted_order(pool, rng))
    }

    /// Endpoints eligible for `model`, in registry order
    ///
    /// Suspended endpoints are dropped, unless every endpoint is suspended, in
    /// which case the full set is returned for a last-ditch attempt.
    async fn candidate_pool(&self, model: &str) -> Result<Vec<Arc<Endpoint>>, GatewayError> {
        let all = self.registry.endpoints_for(model)?;
        let available = self.health.available(&all).await;

        if available.is_empty() && !all.is_empty() {
            tracing::warn!(
                model = %model,
                total_endpoints = all.len(),
                "All endpoints suspended, falling back to full candidate set"
            );
            return Ok(all);
        }

        tracing::debug!(
            model = %model,
            total_endpoints = all.len(),
            available_endpoints = available.len(),
            "Filtered to available endpoints"
        );
        Ok(available)
    }
}

/// Weighted random sampling without replacement
///
/// At each step an endpoint is drawn with probability proportional to its
/// weight among the remaining ones. The cumulative walk runs in registry
/// order, so for a given RNG stream the result is deterministic.
pub fn weighted_order<R: Rng>(
    mut pool: Vec<Arc<Endpoint>>,
    rng: &mut R,
) -> Vec<Arc<Endpoint>> {
    let mut ordered = Vec::with_capacity(pool.len());

    while !pool.is_empty() {
        let total: u64 = pool.iter().map(|e| u64::from(e.weight())).sum();
        if total == 0 {
            // Weights are validated positive; keep registry order if that ever breaks
            ordered.append(&mut pool);
            break;
        }

        let mut pick = rng.random_range(0..total);
        let index = pool
            .iter()
            .position(|e| {
                let weight = u64::from(e.weight());
                if pick < weight {
                    true
                } else {
                    pick -= weight;
                    false
                }
            })
            .unwrap_or(pool.len() - 1);

        ordered.push(pool.remove(index));
    }

    ordered
}
