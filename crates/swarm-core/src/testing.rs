//! Test doubles shared across the workspace. Only compiled when running
//! tests or with the `testing` feature, so no production build ever links
//! them.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::Error;
use crate::message::{Message, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};

/// A provider that returns pre-configured responses and records every
/// request it receives, for asserting what the Agent/Coordinator actually
/// sent.
pub struct MockProvider {
    responses: Mutex<Vec<CompletionResponse>>,
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a response to be returned by the next `complete()` call.
    /// Responses are returned in FIFO order.
    pub fn queue_response(&self, content: &str) {
        let response = CompletionResponse {
            message: Message::assistant(content),
            thinking: None,
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        };
        self.responses.lock().unwrap().insert(0, response);
    }

    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().insert(0, response);
    }

    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop() {
            Some(response) => Ok(response),
            None => Err(Error::transient_backend("no mock response queued")),
        }
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<StreamResult, Error> {
        Err(Error::transient_backend("MockProvider does not support streaming"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_returns_queued_response_fifo() {
        let provider = MockProvider::new();
        provider.queue_response("first");
        provider.queue_response("second");

        let r1 = provider.complete(CompletionRequest::new(vec![])).await.unwrap();
        let r2 = provider.complete(CompletionRequest::new(vec![])).await.unwrap();

        assert_eq!(r1.message.content.to_string_lossy(), "first");
        assert_eq!(r2.message.content.to_string_lossy(), "second");
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_errors_when_empty() {
        let provider = MockProvider::new();
        let err = provider.complete(CompletionRequest::new(vec![])).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
