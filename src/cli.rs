//! Command-line interface for modelgate
//!
//! Provides argument parsing and subcommand handling for the modelgate binary.

use crate::config::Config;
use crate::error::AppResult;
use crate::models::EndpointRegistry;
use clap::{Parser, Subcommand};
use std::fmt::Write as _;

/// Weighted, failover-aware gateway for OpenAI-compatible inference endpoints
#[derive(Parser)]
#[command(name = "modelgate")]
#[command(version)]
#[command(about = "Weighted, failover-aware gateway for OpenAI-compatible inference endpoints")]
#[command(
    long_about = "modelgate spreads chat completion requests across a pool of \
    OpenAI-compatible endpoints by weight, suspends failing endpoints, fails over \
    to the next candidate on endpoint faults and relays streaming responses."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the configuration and list the models it serves
    Check,
}

/// Load and validate `path`, then describe the resolvable models
///
/// # Errors
/// Any configuration or credential error, with the file path in context.
pub fn check_config(path: &str) -> AppResult<String> {
    let config = Config::from_file(path)?;
    let registry = EndpointRegistry::from_config(&config)?;

    let mut report = String::new();
    let _ = writeln!(
        report,
        "{}: OK ({} endpoints, {} models)",
        path,
        registry.endpoints().len(),
        registry.model_ids().len()
    );
    for model in registry.model_ids() {
        let endpoints = registry.endpoints_for(model)?;
        let listed: Vec<String> = endpoints
            .iter()
            .map(|e| format!("{} (weight {})", e.name(), e.weight()))
            .collect();
        let _ = writeln!(report, "  {} -> {}", model, listed.join(", "));
    }
    if let Some(fallback) = &config.gateway.fallback_model {
        let _ = writeln!(report, "  fallback model: {}", fallback);
    }
    Ok(report)
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# modelgate configuration
# =======================
#
# HTTP server, gateway tunables, upstream endpoints and observability.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# GATEWAY
# ─────────────────────────────────────────────────────────────────────────────

[gateway]
# Per-attempt upstream timeout (for streams: time until the first event)
request_timeout_seconds = 60

# No new attempt is started once this much time has passed in a retry cycle
retry_budget_seconds = 30

# Maximum attempts per request, regardless of how many endpoints serve the model
max_attempts = 3

# Consecutive endpoint faults before an endpoint is suspended
failure_threshold = 3

# Suspension backoff: base * 2^(failures - threshold), capped
backoff_base_ms = 1000
backoff_cap_ms = 60000

# Model to try once when every endpoint for the requested model failed
# fallback_model = "small-model"

# Close a committed stream with an error event after this long without data
stream_idle_timeout_seconds = 60

connect_timeout_seconds = 10

# Events buffered between the upstream reader and a slow client
stream_buffer = 32

# ─────────────────────────────────────────────────────────────────────────────
# ENDPOINTS
# ─────────────────────────────────────────────────────────────────────────────
#
# Endpoint fields:
#   - name: identifier used in logs, metrics and /health (default endpoint-<n>)
#   - base_url: API base URL; requests go to <base_url>/chat/completions
#   - api_key or api_key_env: bearer credential, inline or from an env variable
#   - weight: relative traffic share among endpoints serving the same model
#   - models: model ids this endpoint serves
#   - headers: extra headers sent with every request (optional)
#   - model_map: model id -> name this endpoint expects (optional)

[[endpoints]]
name = "primary"
base_url = "http://your-server:8000/v1"
api_key = "sk-your-key"
weight = 3
models = ["your-model"]

[[endpoints]]
name = "secondary"
base_url = "http://another-server:8000/v1"
# api_key_env = "SECONDARY_API_KEY"
weight = 1
models = ["your-model"]

# [endpoints.headers]
# "x-org-id" = "your-org"

# [endpoints.model_map]
# "your-model" = "vendor/your-model-instruct"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
