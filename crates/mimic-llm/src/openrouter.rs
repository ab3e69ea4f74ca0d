//! OpenRouter chat-completions backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use mimic_core::errors::GatewayError;
use mimic_core::prompt::Prompt;
use mimic_core::provider::{GenerateOptions, LlmProvider};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct OpenRouterConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    /// Sent as `X-Title` so requests are attributable in the OpenRouter dashboard.
    pub app_title: String,
    pub request_timeout: Duration,
}

impl OpenRouterConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            app_title: "mimic".to_string(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::transport(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

/// Request body: persona as the system message, everything else as one user turn.
pub fn build_request_body(model: &str, prompt: &Prompt, options: &GenerateOptions) -> Value {
    let mut messages = Vec::new();
    let system = prompt.system_text();
    if !system.is_empty() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt.user_text() }));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "top_p": 0.9,
        "frequency_penalty": 0.1,
        "presence_penalty": 0.1,
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pull the first choice's text out of a completion body.
pub fn parse_completion(body: &str) -> Result<String, GatewayError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::MalformedCompletion(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| GatewayError::MalformedCompletion("no choices in response".into()))
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, prompt, options), fields(model = %self.config.model))]
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        let body = build_request_body(&self.config.model, prompt, options);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .header("X-Title", &self.config.app_title)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Transport {
                    reason: e.to_string(),
                    timed_out: e.is_timeout(),
                }
            })?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(GatewayError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let completion = parse_completion(&text)?;
        debug!(chars = completion.len(), "completion received");
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use mimic_core::prompt::SectionLabel;

    fn prompt() -> Prompt {
        let mut p = Prompt::empty();
        p.push(SectionLabel::Persona, "you are py");
        p.push(SectionLabel::Transcript, "bob: yo");
        p
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    fn provider(base_url: String) -> OpenRouterProvider {
        let mut config = OpenRouterConfig::new(SecretString::from("sk-test"), "test/model");
        config.base_url = base_url;
        OpenRouterProvider::new(config).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let opts = GenerateOptions {
            max_tokens: 99,
            temperature: 0.5,
        };
        let body = build_request_body("m", &prompt(), &opts);
        assert_eq!(body["model"], "m");
        assert_eq!(body["max_tokens"], 99);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "you are py");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "bob: yo");
    }

    #[test]
    fn parse_completion_takes_first_choice() {
        let body = r#"{"choices":[{"message":{"content":"  nah fr \n"}},{"message":{"content":"x"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "nah fr");
    }

    #[test]
    fn parse_completion_without_choices_is_malformed() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(GatewayError::MalformedCompletion(_))
        ));
        assert!(matches!(
            parse_completion("not json"),
            Err(GatewayError::MalformedCompletion(_))
        ));
    }

    #[tokio::test]
    async fn generate_against_local_server() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "test/model");
                Json(json!({"choices": [{"message": {"content": "bro what"}}]}))
            }),
        );
        let base = serve(router).await;
        let out = provider(base)
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "bro what");
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let router = Router::new()
            .route(
                "/limited/chat/completions",
                post(|| async {
                    let mut headers = HeaderMap::new();
                    headers.insert("retry-after", "3".parse().unwrap());
                    (StatusCode::TOO_MANY_REQUESTS, headers, "slow down")
                }),
            )
            .route(
                "/broken/chat/completions",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream") }),
            )
            .route(
                "/broke/chat/completions",
                post(|| async { (StatusCode::PAYMENT_REQUIRED, "insufficient credits") }),
            );
        let base = serve(router).await;

        let err = provider(format!("{base}/limited"))
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(3)));

        let err = provider(format!("{base}/broken"))
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
        assert!(err.is_retryable());

        let err = provider(format!("{base}/broke"))
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientCredits(_)));
        assert!(err.is_fatal());
    }
}
