//! Bounded model invocation: retry, overall timeout, cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use mimic_core::prompt::Prompt;
use mimic_core::provider::{GenerateOptions, LlmProvider};
use mimic_llm::{ReliableConfig, ReliableProvider};

/// Why a completion yielded nothing. Never shown to chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoResponse {
    /// Provider failed after retries; carries the error kind.
    Provider(&'static str),
    Timeout,
    Cancelled,
    /// Provider answered with only whitespace.
    Blank,
}

impl NoResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider(kind) => kind,
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Blank => "blank",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    NoResponse(NoResponse),
}

impl Completion {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::NoResponse(_) => None,
        }
    }
}

pub struct CompletionOrchestrator {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CompletionOrchestrator {
    /// Use `provider` as-is; retry policy is whatever it already applies.
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            provider,
            timeout,
            cancel,
        }
    }

    /// Wrap `provider` with exponential-backoff retries and a circuit breaker.
    pub fn with_retries<P: LlmProvider + 'static>(
        provider: P,
        retry: ReliableConfig,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            Arc::new(ReliableProvider::new(provider, retry)),
            timeout,
            cancel,
        )
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Generate a raw candidate. Every failure collapses to [`Completion::NoResponse`].
    #[instrument(skip_all, fields(provider = self.provider.name(), max_tokens = options.max_tokens))]
    pub async fn complete(&self, prompt: &Prompt, options: &GenerateOptions) -> Completion {
        if self.cancel.is_cancelled() {
            return Completion::NoResponse(NoResponse::Cancelled);
        }
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("completion abandoned on shutdown");
                return Completion::NoResponse(NoResponse::Cancelled);
            }
            r = tokio::time::timeout(self.timeout, self.provider.generate(prompt, options)) => r,
        };

        match result {
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "completion timed out");
                Completion::NoResponse(NoResponse::Timeout)
            }
            Ok(Err(e)) => {
                warn!(error_kind = e.error_kind(), error = %e, "completion failed");
                Completion::NoResponse(NoResponse::Provider(e.error_kind()))
            }
            Ok(Ok(text)) if text.trim().is_empty() => {
                debug!("provider returned blank completion");
                Completion::NoResponse(NoResponse::Blank)
            }
            Ok(Ok(text)) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = text.len(),
                    "completion ready"
                );
                Completion::Text(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::errors::GatewayError;
    use mimic_llm::{MockProvider, MockResponse};

    fn fast_retry() -> ReliableConfig {
        ReliableConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn server_error() -> MockResponse {
        MockResponse::Error(GatewayError::Upstream {
            status: 503,
            body: "upstream exploded: secret stack trace".into(),
        })
    }

    fn orchestrator(mock: &Arc<MockProvider>, timeout: Duration) -> CompletionOrchestrator {
        CompletionOrchestrator::with_retries(
            Arc::clone(mock),
            fast_retry(),
            timeout,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let mock = Arc::new(MockProvider::new(vec![
            server_error(),
            MockResponse::text("yo"),
        ]));
        let out = orchestrator(&mock, Duration::from_secs(30))
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::Text("yo".into()));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_yield_sentinel() {
        let mock = Arc::new(MockProvider::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::text("too late"),
        ]));
        let out = orchestrator(&mock, Duration::from_secs(30))
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::NoResponse(NoResponse::Provider("upstream")));
        // One attempt plus two retries.
        assert_eq!(mock.call_count(), 3);
        assert!(out.text().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::Unauthorized("bad key".into()),
        )]));
        let out = orchestrator(&mock, Duration::from_secs(30))
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert!(matches!(out, Completion::NoResponse(NoResponse::Provider(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_sentinel() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::text("slow"),
        )]));
        let out = orchestrator(&mock, Duration::from_secs(5))
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::NoResponse(NoResponse::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_in_flight_call() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(10),
            MockResponse::text("never sent"),
        )]));
        let cancel = CancellationToken::new();
        let orch = CompletionOrchestrator::with_retries(
            Arc::clone(&mock),
            fast_retry(),
            Duration::from_secs(30),
            cancel.clone(),
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let out = orch
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::NoResponse(NoResponse::Cancelled));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("x")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orch = CompletionOrchestrator::new(mock.clone(), Duration::from_secs(1), cancel);
        let out = orch
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::NoResponse(NoResponse::Cancelled));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_completion_is_no_response() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("  \n ")]));
        let out = orchestrator(&mock, Duration::from_secs(5))
            .complete(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out, Completion::NoResponse(NoResponse::Blank));
    }
}
