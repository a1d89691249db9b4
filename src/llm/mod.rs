pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One role-tagged entry in a model conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub enum LlmError {
    /// The call itself failed: network, auth, rate limit. Never retried by
    /// the generation loop.
    Transport(String),
    /// The call succeeded but the payload was unusable.
    Response(String),
    Config(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transport(msg) => write!(f, "LLM transport error: {}", msg),
            LlmError::Response(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::Config(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Provider-agnostic chat completion. Two concrete providers live under
/// `providers`; the generator only ever sees this interface.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String, LlmError>;
}

pub struct LlmManager {
    model: Box<dyn ChatModel + Send + Sync>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let model: Box<dyn ChatModel + Send + Sync> = match config.backend.as_str() {
            "openai" => Box::new(providers::openai::OpenAiProvider::new(config)?),
            "anthropic" => Box::new(providers::anthropic::AnthropicProvider::new(config)?),
            other => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM backend: {}",
                    other
                )))
            }
        };

        Ok(Self { model })
    }

    /// Wrap an already-built model; used by tests to stub the provider.
    #[cfg(test)]
    pub fn with_model(model: Box<dyn ChatModel + Send + Sync>) -> Self {
        Self { model }
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: usize,
    ) -> Result<String, LlmError> {
        self.model.complete(messages, temperature, max_tokens).await
    }
}
