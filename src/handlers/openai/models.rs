//! OpenAI-compatible models list handler
//!
//! Handles GET /v1/models requests.

use crate::handlers::AppState;
use axum::{Json, extract::State, response::IntoResponse};

use super::types::{ModelObject, ModelsListResponse};

/// Owner reported for every listed model
const OWNED_BY: &str = "modelgate";

/// GET /v1/models handler
///
/// Lists every model id resolvable through the endpoint registry, in
/// first-declared order. Suspended endpoints do not hide a model: the
/// selector still makes a last-ditch attempt when all are suspended.
pub async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    let models = state
        .gateway()
        .registry()
        .model_ids()
        .iter()
        .map(|id| ModelObject::new(id.as_str(), OWNED_BY))
        .collect();

    Json(ModelsListResponse::new(models))
}
