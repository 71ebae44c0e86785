//! Scripted LLM for tests: pops one canned response per invoke and records
//! every request it saw.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmRequest, LlmResponse};

pub struct MockLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    fallback: String,
}

impl MockLlm {
    /// Always replies with `text` and no tool calls.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: text.into(),
        }
    }

    /// Plays `responses` in order, then falls back to a plain-text reply.
    pub fn with_script(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
            fallback: "done".into(),
        }
    }

    /// Queues an error as the next result (for retry tests).
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn push_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(LlmResponse::text(self.fallback.clone())),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            system: "sys".into(),
            messages: vec![],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn script_plays_in_order_then_falls_back() {
        let llm = MockLlm::with_script(vec![LlmResponse::text("one"), LlmResponse::text("two")]);
        assert_eq!(llm.invoke(&request()).await.unwrap().content, "one");
        assert_eq!(llm.invoke(&request()).await.unwrap().content, "two");
        assert_eq!(llm.invoke(&request()).await.unwrap().content, "done");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn queued_error_is_returned_once() {
        let llm = MockLlm::with_text("ok");
        llm.push_error(LlmError::Request("boom".into()));
        assert!(llm.invoke(&request()).await.is_err());
        assert!(llm.invoke(&request()).await.is_ok());
    }
}
