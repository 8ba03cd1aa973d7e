//! Language-model client abstraction used by the fallback and description
//! stages.

pub mod mock;
pub mod openai;
pub mod rate_limit;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub use openai::OpenAiClient;
pub use rate_limit::{AdaptiveLimiter, complete_with_retry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Server returned 429 Too Many Requests.
    #[error("rate limited (429){}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no LLM client configured")]
    NotConfigured,
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {:.1}s", d.as_secs_f64()))
        .unwrap_or_default()
}

impl LlmError {
    /// Timeouts, network failures, 429 and 5xx are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout(_) | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Malformed(_) | LlmError::NotConfigured => false,
        }
    }
}

/// A chat-completion style text generator.
pub trait LlmClient: Send + Sync {
    /// Model or provider name, for logs.
    fn name(&self) -> &str;

    /// Complete `prompt`, returning the model's text response.
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

/// Per-call limits shared by the LLM stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlmSettings {
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub description_max_tokens: u32,
    pub context_pages: usize,
    pub context_chars: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_tokens: 300,
            temperature: 0.1,
            description_max_tokens: 200,
            context_pages: 3,
            context_chars: 3000,
        }
    }
}

impl LlmSettings {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.llm_timeout_secs.max(1)),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            description_max_tokens: config.description_max_tokens,
            context_pages: config.llm_context_pages.max(1),
            context_chars: config.llm_context_chars.max(1),
        }
    }
}
