//! modelgate - weighted, failover-aware gateway for OpenAI-compatible endpoints
//!
//! Requests for a model are spread across every endpoint serving it in
//! proportion to configured weights. Endpoints that keep failing are
//! suspended with exponential backoff, failed attempts move on to the next
//! candidate within an attempt cap and time budget, and streaming responses
//! are relayed event by event once the first event arrives.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod telemetry;
pub mod upstream;
