//! Outbound REST calls: post, reply, typing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use mimic_core::chat::ChatClient;
use mimic_core::errors::DispatchError;
use mimic_core::ids::{ChannelId, MessageId};

use crate::types::{create_message_body, CreatedMessage};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DiscordRest {
    client: Client,
    token: SecretString,
    api_base: String,
}

impl DiscordRest {
    pub fn new(token: SecretString, api_base: impl Into<String>) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, channel_id: &ChannelId, tail: &str) -> String {
        format!("{}/channels/{}/{}", self.api_base, channel_id, tail)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    async fn create_message(
        &self,
        channel_id: &ChannelId,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<MessageId, DispatchError> {
        let resp = self
            .client
            .post(self.url(channel_id, "messages"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&create_message_body(text, reply_to))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let created: CreatedMessage = resp
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("unreadable create response: {e}")))?;
        debug!(message_id = %created.id, "message created");
        Ok(MessageId::from_raw(created.id))
    }
}

#[async_trait]
impl ChatClient for DiscordRest {
    #[instrument(skip(self, text), fields(channel_id = %channel_id))]
    async fn send(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId, DispatchError> {
        self.create_message(channel_id, text, None).await
    }

    #[instrument(skip(self, text), fields(channel_id = %channel_id, target = %target))]
    async fn reply(
        &self,
        channel_id: &ChannelId,
        target: &MessageId,
        text: &str,
    ) -> Result<MessageId, DispatchError> {
        self.create_message(channel_id, text, Some(target)).await
    }

    async fn typing(&self, channel_id: &ChannelId) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(self.url(channel_id, "typing"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DispatchError::Rejected {
                status: resp.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    fn client(base: String) -> DiscordRest {
        DiscordRest::new(SecretString::from("tok"), base).unwrap()
    }

    #[tokio::test]
    async fn reply_threads_and_returns_id() {
        let router = Router::new().route(
            "/channels/{channel}/messages",
            post(
                |Path(channel): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(channel, "c1");
                    assert_eq!(headers["authorization"], "Bot tok");
                    assert_eq!(body["content"], "hardstuck gold");
                    assert_eq!(body["message_reference"]["message_id"], "m9");
                    Json(json!({"id": "5001", "channel_id": "c1"}))
                },
            ),
        );
        let rest = client(serve(router).await);
        let id = rest
            .reply(&ChannelId::from("c1"), &MessageId::from("m9"), "hardstuck gold")
            .await
            .unwrap();
        assert_eq!(id.as_str(), "5001");
    }

    #[tokio::test]
    async fn send_has_no_reference() {
        let router = Router::new().route(
            "/channels/{channel}/messages",
            post(|Json(body): Json<Value>| async move {
                assert!(body.get("message_reference").is_none());
                Json(json!({"id": "5002"}))
            }),
        );
        let rest = client(serve(router).await);
        let id = rest.send(&ChannelId::from("c1"), "yo").await.unwrap();
        assert_eq!(id.as_str(), "5002");
    }

    #[tokio::test]
    async fn rejection_maps_to_dispatch_error() {
        let router = Router::new().route(
            "/channels/{channel}/messages",
            post(|| async { (StatusCode::FORBIDDEN, "Missing Permissions") }),
        );
        let rest = client(serve(router).await);
        let err = rest.send(&ChannelId::from("c1"), "yo").await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn typing_indicator() {
        let router = Router::new().route(
            "/channels/{channel}/typing",
            post(|| async { StatusCode::NO_CONTENT }),
        );
        let rest = client(serve(router).await);
        rest.typing(&ChannelId::from("c1")).await.unwrap();
    }
}
