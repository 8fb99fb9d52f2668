//! Type-safe endpoint name wrapper
//!
//! Endpoint names key health tracking, metrics labels and attempt records.

use crate::models::registry::Endpoint;

/// Type-safe wrapper for endpoint names
///
/// Production code builds names with `EndpointName::from(&endpoint)`, so every
/// name refers to a registered endpoint. `From<&str>` / `From<String>` do not
/// check the registry; lookups by an unknown name simply miss.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct EndpointName(String);

impl EndpointName {
    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Endpoint> for EndpointName {
    fn from(endpoint: &Endpoint) -> Self {
        Self(endpoint.name().to_string())
    }
}

impl From<String> for EndpointName {
    /// Note: does NOT validate that the endpoint exists.
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for EndpointName {
    /// Note: does NOT validate that the endpoint exists.
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::borrow::Borrow<str> for EndpointName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
