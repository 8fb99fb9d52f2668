//! Endpoint registry, health tracking and weighted selection
//!
//! Leaves of the gateway: the immutable endpoint set, the passive health
//! tracker fed by request outcomes, and the selector combining both into an
//! ordered candidate list.

pub mod endpoint_name;
pub mod health;
pub mod registry;
pub mod selector;

pub use endpoint_name::EndpointName;
pub use health::{EndpointHealth, HealthError, HealthPolicy, HealthTracker};
pub use registry::{Credential, Endpoint, EndpointRegistry, ModelId};
pub use selector::WeightedSelector;
