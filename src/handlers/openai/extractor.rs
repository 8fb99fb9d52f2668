//! Custom JSON extractor with OpenAI-compatible error responses
//!
//! Wraps Axum's `Json` extractor to produce OpenAI-formatted error responses
//! when deserialization or request validation fails. This keeps gateway errors
//! readable by OpenAI SDKs (official Python/JS libraries, LangChain).

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

/// OpenAI-compatible error response structure
///
/// OpenAI SDKs expect errors in this format:
/// ```json
/// {
///   "error": {
///     "message": "...",
///     "type": "invalid_request_error",
///     "param": null,
///     "code": null
///   }
/// }
/// ```
#[derive(Debug, serde::Serialize)]
pub struct OpenAiError {
    pub error: OpenAiErrorBody,
}

#[derive(Debug, serde::Serialize)]
pub struct OpenAiErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl OpenAiError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: OpenAiErrorBody {
                message: message.into(),
                error_type: error_type.into(),
                param: None,
                code: None,
            },
        }
    }

    /// Create a new OpenAI-formatted error for invalid requests
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error")
    }

    /// Create a new OpenAI-formatted error for server errors
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(message, "server_error")
    }

    /// Create an error with a specific parameter that failed validation
    pub fn invalid_param(message: impl Into<String>, param: impl Into<String>) -> Self {
        let mut error = Self::invalid_request(message);
        error.error.param = Some(param.into());
        error
    }
}

/// Request field a validation message is about
///
/// Matches the messages raised while deserializing `InboundRequest`.
fn offending_param(message: &str) -> Option<&'static str> {
    const FIELDS: [(&str, &str); 5] = [
        ("model cannot be empty", "model"),
        ("messages array cannot be empty", "messages"),
        ("message role cannot be empty", "messages"),
        ("temperature must", "temperature"),
        ("top_p must", "top_p"),
    ];
    FIELDS
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, param)| *param)
}

/// OpenAI-compatible JSON extraction error
///
/// Status codes by rejection type:
/// - JSON syntax and validation errors → 400 Bad Request
/// - Missing content type → 415 Unsupported Media Type
#[derive(Debug)]
pub struct OpenAiJsonRejection(JsonRejection);

impl IntoResponse for OpenAiJsonRejection {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            JsonRejection::MissingJsonContentType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json".to_string(),
            ),
            // Syntax, data and body errors alike are caller faults
            _ => (StatusCode::BAD_REQUEST, self.0.body_text()),
        };
        tracing::debug!(status = %status, reason = %message, "Rejected request body");
        let error = match offending_param(&message) {
            Some(param) => OpenAiError::invalid_param(message, param),
            None => OpenAiError::invalid_request(message),
        };
        (status, Json(error)).into_response()
    }
}

/// Custom JSON extractor that produces OpenAI-compatible error responses
///
/// Use this instead of `axum::Json` in OpenAI-compatible handlers.
pub struct OpenAiJson<T>(pub T);

impl<S, T> FromRequest<S> for OpenAiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = OpenAiJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(OpenAiJson(value)),
            Err(rejection) => Err(OpenAiJsonRejection(rejection)),
        }
    }
}
