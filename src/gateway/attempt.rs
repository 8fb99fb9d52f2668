//! Per-attempt bookkeeping for one retry cycle

use crate::models::EndpointName;
use std::time::Duration;
use tokio::time::Instant;

/// Classified result of one forwarding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptOutcome {
    Success,
    Timeout,
    ConnectionError,
    /// Upstream 5xx (or an unusable 2xx body)
    ServerError,
    /// Upstream 4xx: caller fault
    ClientError,
}

impl AttemptOutcome {
    /// Endpoint faults count against health and move on to the next candidate
    pub fn is_endpoint_fault(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionError | Self::ServerError
        )
    }

    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt against one endpoint; lives only for the retry cycle
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub endpoint: EndpointName,
    pub start: Instant,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn new(endpoint: EndpointName, start: Instant, outcome: AttemptOutcome) -> Self {
        Self {
            endpoint,
            start,
            elapsed: start.elapsed(),
            outcome,
        }
    }
}

/// Compact `name:outcome` list for diagnostics
///
/// Each entry carries the attempt's offset from the first attempt and its
/// duration, e.g. `e1:server_error@0ms/12ms`.
pub fn summarize(attempts: &[AttemptRecord]) -> String {
    let Some(first) = attempts.first() else {
        return String::new();
    };
    attempts
        .iter()
        .map(|a| {
            format!(
                "{}:{}@{}ms/{}ms",
                a.endpoint,
                a.outcome,
                a.start.saturating_duration_since(first.start).as_millis(),
                a.elapsed.as_millis()
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
