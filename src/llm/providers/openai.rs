//! OpenAI-compatible chat-completions client.
//!
//! Works against api.openai.com and any compatible gateway via a custom base
//! URL. The client performs no retries of its own: a 429 becomes
//! [`ProviderError::RateLimited`] and credential rotation is the
//! dispatcher's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::ProviderError;
use crate::llm::keypool::Credential;

use super::{ChatRequest, ChatResponse, GenerationProvider, Usage};

/// Default API endpoint.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Request timeout in seconds. Wiki page generation produces long
/// completions, so this is deliberately generous.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Chat-completions client for OpenAI-compatible APIs.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a client against the default OpenAI endpoint.
    pub fn new() -> Self {
        Self::with_base_url(OPENAI_BASE_URL)
    }

    /// Create a client against a custom endpoint (compatible gateways,
    /// test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            base_url: base_url.into(),
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate(
        &self,
        credential: &Credential,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", credential.secret()))
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = http_response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status, &body));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Parse("response contained no choices".to_string()))?;

        Ok(ChatResponse {
            model: api_response.model,
            content,
            usage: api_response
                .usage
                .map(|u| Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

/// Map a non-2xx status and body to a provider error.
fn error_from_status(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == 429 {
        ProviderError::RateLimited(message)
    } else {
        ProviderError::Api {
            code: status,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::Message;

    #[test]
    fn test_rate_limit_status_maps_to_rate_limited() {
        let body = "{\"error\":{\"message\":\"Rate limit reached for requests\"}}";
        let err = error_from_status(429, body);
        assert!(matches!(err, ProviderError::RateLimited(ref m) if m.contains("Rate limit")));
    }

    #[test]
    fn test_other_status_maps_to_api_error() {
        let err = error_from_status(401, "{\"error\":{\"message\":\"Invalid API key\"}}");
        assert!(matches!(
            err,
            ProviderError::Api { code: 401, ref message } if message == "Invalid API key"
        ));
    }

    #[test]
    fn test_unstructured_error_body_passes_through() {
        let err = error_from_status(502, "Bad Gateway");
        assert!(matches!(
            err,
            ProviderError::Api { code: 502, ref message } if message == "Bad Gateway"
        ));
    }

    #[test]
    fn test_response_parsing() {
        let json = "{\"model\":\"gpt-4o\",\"choices\":[{\"message\":{\"role\":\"assistant\",\
                    \"content\":\"# Overview\"}}],\"usage\":{\"prompt_tokens\":10,\
                    \"completion_tokens\":5,\"total_tokens\":15}}";
        let parsed: ApiResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.model, "gpt-4o");
        assert_eq!(parsed.choices[0].message.content, "# Overview");
        assert_eq!(parsed.usage.expect("usage").total_tokens, 15);
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider = OpenAiProvider::with_base_url("http://localhost:65535");
        let credential = Credential::new("openai-1", "sk-test");
        let request = ChatRequest::new("gpt-4o", vec![Message::user("hello")]);

        let result = provider.generate(&credential, request).await;
        assert!(matches!(result, Err(ProviderError::RequestFailed(_))));
    }
}
