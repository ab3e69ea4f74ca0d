use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mimic_core::errors::GatewayError;
use mimic_core::prompt::Prompt;
use mimic_core::provider::{GenerateOptions, LlmProvider};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this completion text.
    Text(String),
    /// Fail the generate() call.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and keeps
/// every prompt it was asked to complete.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        _options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(GatewayError::Rejected {
                status: 0,
                body: format!("MockProvider: no response configured for call {idx}"),
            });
        };

        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<String, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text.clone()),
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::text("hello world")]);
        let out = mock
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(mock.prompts().len(), 1);
    }

    #[tokio::test]
    async fn error_response() {
        let mock = MockProvider::new(vec![MockResponse::Error(
            GatewayError::Unauthorized("bad".into()),
        )]);
        let result = mock.generate(&Prompt::empty(), &GenerateOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("only one")]);
        let _ = mock.generate(&Prompt::empty(), &GenerateOptions::default()).await;
        let result = mock.generate(&Prompt::empty(), &GenerateOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response_waits() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::text("after delay"),
        )]);
        let start = tokio::time::Instant::now();
        let out = mock
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "after delay");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn provider_properties() {
        let mock = MockProvider::new(vec![]);
        assert_eq!(mock.name(), "mock");
        assert_eq!(mock.model(), "mock-model");
    }
}
