//! LLM client abstraction for the reasoning loop.
//!
//! The runtime builds one [`LlmRequest`] per iteration (system prompt,
//! hydrated transcript, retrieved tool specs) and expects assistant text plus
//! optional tool calls back. Implementations: [`ChatOpenAI`] (real provider),
//! [`MockLlm`] (scripted, for tests).

mod mock;
mod openai;
mod retry;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{ChatMessage, ToolCall};
use crate::tools::ToolSpec;

/// Default wall-clock deadline for one completion call.
pub const LLM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport or provider error; retried with backoff.
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm call timed out")]
    Timeout,
    #[error("llm returned no choices")]
    Empty,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Request(_) | LlmError::Timeout)
    }
}

/// One completion request.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// Token usage for one call, when the provider reports it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Assistant text plus any tool calls; empty `tool_calls` ends the loop.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion. The caller owns retries and the deadline.
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Model identifier, recorded on sessions.
    fn model(&self) -> &str;

    /// Provider identifier, recorded on sessions.
    fn provider(&self) -> &str;
}
