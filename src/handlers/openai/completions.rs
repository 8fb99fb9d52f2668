//! OpenAI-compatible chat completions handler
//!
//! Handles POST /v1/chat/completions requests (both streaming and non-streaming).

use crate::error::AppError;
use crate::gateway::GatewayResponse;
use crate::handlers::AppState;
use crate::middleware::request_id::RequestId;
use axum::{
    Extension, Json,
    extract::State,
    response::{IntoResponse, Response},
};

use super::extractor::OpenAiJson;
use super::types::InboundRequest;

/// POST /v1/chat/completions handler
///
/// **Non-streaming** (`stream: false` or omitted): returns the upstream
/// completion object unchanged.
///
/// **Streaming** (`stream: true`): returns a `text/event-stream` body relaying
/// the upstream events in order, ending with `data: [DONE]`, or with an
/// `event: error` if the upstream fails part-way.
///
/// Upstream 4xx responses are relayed with their original status and body.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    OpenAiJson(request): OpenAiJson<InboundRequest>,
) -> Result<Response, AppError> {
    tracing::debug!(
        request_id = %request_id,
        model = %request.model(),
        messages_count = request.messages().len(),
        stream = request.is_stream(),
        "Received chat completions request"
    );

    let response = match state.gateway().complete(request, request_id).await? {
        GatewayResponse::Buffered(value) => Json(value).into_response(),
        GatewayResponse::Stream(session) => {
            tracing::debug!(
                request_id = %request_id,
                endpoint_name = %session.endpoint(),
                "Streaming response committed"
            );
            session.into_response()
        }
    };

    Ok(response)
}
