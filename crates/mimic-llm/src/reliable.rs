use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use mimic_core::errors::GatewayError;
use mimic_core::prompt::Prompt;
use mimic_core::provider::{GenerateOptions, LlmProvider};

/// Configuration for the ReliableProvider retry and circuit breaker behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps an LlmProvider with retry logic and circuit breaker.
///
/// - Retries retryable errors with exponential backoff + jitter
/// - Respects `retry_after` hints from rate limit responses
/// - Circuit breaker: N consecutive failed calls → open → cooldown → half-open → success → closed
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn check_circuit(&self) -> Result<(), GatewayError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if *state == CircuitState::Closed || *state == CircuitState::HalfOpen {
                warn!(
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Exponential backoff (base * 2^attempt, capped) with symmetric jitter.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_ms = (capped + jitter).max(1.0);

        Duration::from_millis(final_ms as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        self.check_circuit()?;

        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.generate(prompt, options).await {
                Ok(text) => {
                    self.record_success();
                    return Ok(text);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == self.config.max_retries {
                        self.record_failure();
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        "retrying completion after error"
                    );

                    last_error = Some(e);
                    tokio::time::sleep(delay).await;

                    self.check_circuit()?;
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::transport("max retries exceeded")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn server_error() -> MockResponse {
        MockResponse::Error(GatewayError::Upstream {
            status: 500,
            body: "internal".into(),
        })
    }

    fn fast(max_retries: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable =
            ReliableProvider::with_defaults(MockProvider::new(vec![MockResponse::text("hello")]));
        let out = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out.unwrap(), "hello");
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_retryable_error() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]);
        let reliable = ReliableProvider::new(mock, fast(2));
        let out = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out.unwrap(), "recovered");
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::Unauthorized("bad key".into())),
            MockResponse::text("should not reach"),
        ]);
        let reliable = ReliableProvider::with_defaults(mock);
        let err = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await
            .err()
            .expect("expected error");
        assert!(matches!(err, GatewayError::Unauthorized(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_exhausted() {
        let mock = MockProvider::new(vec![server_error(), server_error(), server_error()]);
        let reliable = ReliableProvider::new(mock, fast(2));
        let result = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert!(result.is_err());
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_threshold() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::text("unreachable"),
        ]);
        let config = ReliableConfig {
            circuit_breaker_threshold: 3,
            ..fast(0)
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..3 {
            let _ = reliable
                .generate(&Prompt::empty(), &GenerateOptions::default())
                .await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await
            .err()
            .expect("expected error");
        assert!(matches!(err, GatewayError::CircuitOpen));
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_recovers_after_cooldown() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]);
        let config = ReliableConfig {
            circuit_breaker_threshold: 2,
            circuit_breaker_cooldown: Duration::from_millis(30),
            ..fast(0)
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..2 {
            let _ = reliable
                .generate(&Prompt::empty(), &GenerateOptions::default())
                .await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        std::thread::sleep(Duration::from_millis(40));

        let out = reliable
            .generate(&Prompt::empty(), &GenerateOptions::default())
            .await;
        assert_eq!(out.unwrap(), "recovered");
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn retry_delay_respects_suggested_up_to_max() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(
            reliable.retry_delay(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            reliable.retry_delay(0, Some(Duration::from_secs(600))),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn retry_delay_exponential_backoff() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(2, None).as_millis(), 400);
    }

    #[test]
    fn retry_delay_jitter_stays_in_range() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        for _ in 0..50 {
            let ms = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "delay out of range: {ms}");
        }
    }

    #[test]
    fn config_defaults() {
        let config = ReliableConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.circuit_breaker_threshold, 5);
    }

    #[test]
    fn provider_delegates_properties() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
    }
}
