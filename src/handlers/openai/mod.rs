//! OpenAI-compatible API handlers
//!
//! - `POST /v1/chat/completions` - Chat completions, buffered or SSE
//! - `GET /v1/models` - List resolvable models

pub mod completions;
pub mod extractor;
pub mod models;
pub mod types;
