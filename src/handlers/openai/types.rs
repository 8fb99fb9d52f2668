//! OpenAI-compatible request and response types
//!
//! The gateway is a transparent pass-through: an [`InboundRequest`] keeps the
//! caller's whole JSON object and only exposes typed views of the fields the
//! gateway itself needs. Validation is enforced during deserialization, so
//! invalid instances cannot exist.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Object type for list responses (e.g., model list)
pub const OBJECT_LIST: &str = "list";
/// Object type for individual model entries
pub const OBJECT_MODEL: &str = "model";

// =============================================================================
// Shared Validation Logic
// =============================================================================

/// Validate the typed request fields
fn validate_request_fields(
    model: &str,
    messages: &[ChatMessage],
    temperature: Option<f64>,
    top_p: Option<f64>,
) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("model cannot be empty".to_string());
    }

    if messages.is_empty() {
        return Err("messages array cannot be empty".to_string());
    }

    // Temperature range [0.0, 2.0]
    if let Some(temp) = temperature {
        if !temp.is_finite() {
            return Err("temperature must be a finite number".to_string());
        }
        if !(0.0..=2.0).contains(&temp) {
            return Err("temperature must be between 0.0 and 2.0".to_string());
        }
    }

    // top_p range (0.0, 1.0]
    if let Some(top_p) = top_p {
        if !top_p.is_finite() {
            return Err("top_p must be a finite number".to_string());
        }
        if top_p <= 0.0 || top_p > 1.0 {
            return Err("top_p must be between 0.0 (exclusive) and 1.0 (inclusive)".to_string());
        }
    }

    Ok(())
}

// =============================================================================
// Message Types
// =============================================================================

/// A single message in the conversation
///
/// The role is kept as a string so newer roles (`tool`, `developer`, ...) pass
/// through; content may be a string, an array of parts, or null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    content: Value,
}

impl ChatMessage {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn content(&self) -> &Value {
        &self.content
    }
}

impl<'de> Deserialize<'de> for ChatMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawMessage {
            role: String,
            #[serde(default)]
            content: Value,
        }

        let raw = RawMessage::deserialize(deserializer)?;
        if raw.role.trim().is_empty() {
            return Err(serde::de::Error::custom("message role cannot be empty"));
        }

        Ok(ChatMessage {
            role: raw.role,
            content: raw.content,
        })
    }
}

// =============================================================================
// Inbound Request
// =============================================================================

/// Incoming chat completion request
///
/// Created per call and never mutated; the outbound body is derived with
/// [`InboundRequest::to_upstream_body`].
#[derive(Debug, Clone)]
pub struct InboundRequest {
    body: Map<String, Value>,
    model: String,
    messages: Vec<ChatMessage>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    stream: bool,
}

impl InboundRequest {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// Pass-through parameters the gateway does not interpret
    pub fn extra(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.body.iter().filter(|(k, _)| {
            !matches!(
                k.as_str(),
                "model" | "messages" | "temperature" | "top_p" | "stream"
            )
        })
    }

    /// Outbound body: the original object with only `model` replaced
    pub fn to_upstream_body(&self, upstream_model: &str) -> Value {
        let mut body = self.body.clone();
        body.insert("model".to_string(), Value::String(upstream_model.to_string()));
        Value::Object(body)
    }
}

impl<'de> Deserialize<'de> for InboundRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawRequest {
            model: String,
            messages: Vec<ChatMessage>,
            #[serde(default)]
            stream: Option<bool>,
            temperature: Option<f64>,
            top_p: Option<f64>,
        }

        let body = Map::<String, Value>::deserialize(deserializer)?;
        let raw = RawRequest::deserialize(Value::Object(body.clone()))
            .map_err(serde::de::Error::custom)?;

        validate_request_fields(&raw.model, &raw.messages, raw.temperature, raw.top_p)
            .map_err(serde::de::Error::custom)?;

        Ok(InboundRequest {
            body,
            model: raw.model,
            messages: raw.messages,
            temperature: raw.temperature,
            top_p: raw.top_p,
            stream: raw.stream.unwrap_or(false),
        })
    }
}

// =============================================================================
// Models List Response
// =============================================================================

/// A model object for the models list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelObject {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: OBJECT_MODEL.to_string(),
            created: 0,
            owned_by: owned_by.into(),
        }
    }
}

/// Response for GET /v1/models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsListResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}

impl ModelsListResponse {
    pub fn new(models: Vec<ModelObject>) -> Self {
        Self {
            object: OBJECT_LIST.to_string(),
            data: models,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
