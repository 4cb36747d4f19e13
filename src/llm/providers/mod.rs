//! Generation provider seam.
//!
//! The core only needs one thing from a provider: a single outbound call
//! that either succeeds, signals a rate limit, or fails. Credential
//! selection stays with the dispatcher, so providers take the credential as
//! a per-call argument instead of owning one.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::llm::keypool::Credential;

/// A message in a chat-completion conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One generation call to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Create a request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one generation call, flattened to the first choice.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Model that served the request.
    pub model: String,
    /// Generated text.
    pub content: String,
    /// Token usage for the call.
    pub usage: Usage,
}

/// One rate-limited outbound generation call.
///
/// Implementations map the provider's rate-limit signal (e.g., HTTP 429) to
/// [`ProviderError::RateLimited`]; the dispatcher handles everything from
/// there.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        credential: &Credential,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;
}
