//! Model gateway: message types and the async client.
//!
//! All generative models sit behind one gateway endpoint. The engine
//! never sees provider specifics, only model identifiers and ordered
//! message lists.

mod client;

pub use client::{GatewayClient, HttpBackend, ModelBackend};

use serde::{Deserialize, Serialize};

/// Message in a model conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Per-call timeout, milliseconds.
    pub timeout_ms: u64,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4_096,
            timeout_ms: 60_000,
        }
    }
}

impl QueryParams {
    /// Set the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A single model request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    /// Model identifier at the gateway.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<Message>,
    /// Generation parameters.
    pub params: QueryParams,
}

impl ModelRequest {
    /// Create a request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            params: QueryParams::default(),
        }
    }

    /// Set parameters.
    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }
}

/// A model completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Responding model identifier.
    pub model: String,
    /// Completion text.
    pub content: String,
    /// Wall-clock latency, milliseconds.
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::system("instructions");
        assert_eq!(msg.role, MessageRole::System);
        let msg = Message::user("question");
        assert_eq!(msg.role, MessageRole::User);
        let msg = Message::assistant("answer");
        assert_eq!(msg.role, MessageRole::Assistant);
    }

    #[test]
    fn test_message_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_request_builder() {
        let request = ModelRequest::new("gateway/gpt-4", vec![Message::user("q")])
            .with_params(QueryParams::default().with_timeout_ms(120_000).with_temperature(0.2));
        assert_eq!(request.model, "gateway/gpt-4");
        assert_eq!(request.params.timeout_ms, 120_000);
        assert_eq!(request.params.temperature, 0.2);
    }
}
