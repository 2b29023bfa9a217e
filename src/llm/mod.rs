/// LLM client trait and shared request/response types.
///
/// Every agent call goes through [`LlmClient`]; production uses
/// [`gemini::GeminiClient`], tests and test mode use [`mock::MockLlm`].
pub mod gemini;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::tools::ToolCall;

/// Errors that can occur while talking to the model.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM is not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty response from model")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// System instruction (agent prompt plus context blocks).
    pub system: String,
    /// Prior turns, oldest first.
    pub history: Vec<ChatTurn>,
    pub message: String,
    /// JSON-schema function declarations the model may call.
    pub functions: Vec<Value>,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    /// Native function calls requested by the model.
    pub function_calls: Vec<ToolCall>,
}

impl GenerateResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }
}

/// Trait for LLM back ends.
///
/// Implementations must be `Send + Sync` to be shared behind `Arc`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError>;

    /// Model identifier, for logs and status output.
    fn model(&self) -> &str;
}

/// Client for the configured mode. `None` when production mode has no API
/// key; chats then answer with a fixed notice.
pub fn from_config(config: &Config) -> Result<Option<Arc<dyn LlmClient>>, LlmError> {
    if config.is_test_mode() {
        info!("Test mode: using mock LLM");
        return Ok(Some(Arc::new(mock::MockLlm::new())));
    }
    match gemini::GeminiClient::new(&config.llm) {
        Ok(client) => {
            info!("Using Gemini model {}", config.llm.model);
            Ok(Some(Arc::new(client)))
        }
        Err(LlmError::NotConfigured(reason)) => {
            warn!("LLM disabled: {reason}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
