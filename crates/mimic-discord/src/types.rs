//! Gateway and REST payloads, and their mapping onto pipeline types.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use mimic_core::ids::{MessageId, UserId};
use mimic_core::message::Message;
use mimic_core::status::BotAccount;

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
/// Privileged; without it guild messages arrive with empty content.
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

pub const INTENTS: u64 = INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

/// Fallback when HELLO omits the interval.
pub const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl DiscordUser {
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadyEvent {
    pub user: DiscordUser,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ReadyEvent {
    pub fn account(&self) -> BotAccount {
        BotAccount {
            id: UserId::from_raw(self.user.id.clone()),
            name: self.user.username.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: DiscordUser,
    #[serde(default)]
    pub member: Option<GuildMember>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<DiscordUser>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    pub timestamp: DateTime<Utc>,
}

impl MessageCreate {
    /// Map to a pipeline message. Direct messages are out of scope and map to `None`.
    pub fn into_message(self) -> Option<Message> {
        self.guild_id.as_ref()?;
        let author_name = self
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .unwrap_or_else(|| self.author.display_name().to_string());
        Some(Message {
            id: MessageId::from_raw(self.id),
            channel_id: self.channel_id.as_str().into(),
            author_id: UserId::from_raw(self.author.id),
            author_name,
            author_is_bot: self.author.bot,
            content: self.content,
            mentions: self
                .mentions
                .into_iter()
                .map(|u| UserId::from_raw(u.id))
                .collect(),
            reply_to: self
                .message_reference
                .and_then(|r| r.message_id)
                .map(MessageId::from_raw),
            timestamp: self.timestamp,
        })
    }
}

pub fn identify_payload(token: &str) -> Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "mimic",
                "device": "mimic"
            }
        }
    })
}

pub fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": opcode::HEARTBEAT, "d": sequence })
}

/// Body for `POST /channels/{id}/messages`. Never pings anyone.
pub fn create_message_body(content: &str, reply_to: Option<&MessageId>) -> Value {
    let mut body = json!({
        "content": content,
        "allowed_mentions": { "parse": [], "replied_user": false },
    });
    if let Some(target) = reply_to {
        body["message_reference"] = json!({
            "message_id": target.as_str(),
            "fail_if_not_exists": false,
        });
    }
    body
}

#[derive(Debug, Deserialize)]
pub struct CreatedMessage {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(guild: Option<&str>) -> Value {
        json!({
            "id": "1001",
            "channel_id": "c1",
            "guild_id": guild,
            "author": {"id": "42", "username": "bob", "global_name": "Bobby"},
            "member": {"nick": null},
            "content": "<@12345> yo",
            "mentions": [{"id": "12345", "username": "py", "bot": false}],
            "message_reference": {"message_id": "999"},
            "timestamp": "2024-05-01T12:00:00.000000+00:00"
        })
    }

    #[test]
    fn guild_message_maps_to_pipeline_message() {
        let raw: MessageCreate = serde_json::from_value(create(Some("g1"))).unwrap();
        let m = raw.into_message().unwrap();
        assert_eq!(m.id.as_str(), "1001");
        assert_eq!(m.channel_id.as_str(), "c1");
        assert_eq!(m.author_name, "Bobby");
        assert!(m.mentions.contains(&UserId::from("12345")));
        assert_eq!(m.reply_to, Some(MessageId::from("999")));
        assert!(!m.author_is_bot);
    }

    #[test]
    fn nickname_wins_over_account_names() {
        let mut v = create(Some("g1"));
        v["member"]["nick"] = json!("bobert");
        let raw: MessageCreate = serde_json::from_value(v).unwrap();
        assert_eq!(raw.into_message().unwrap().author_name, "bobert");
    }

    #[test]
    fn direct_messages_are_dropped() {
        let raw: MessageCreate = serde_json::from_value(create(None)).unwrap();
        assert!(raw.into_message().is_none());
    }

    #[test]
    fn bot_flag_is_carried() {
        let mut v = create(Some("g1"));
        v["author"]["bot"] = json!(true);
        let raw: MessageCreate = serde_json::from_value(v).unwrap();
        assert!(raw.into_message().unwrap().author_is_bot);
    }

    #[test]
    fn hello_interval() {
        let hello: GatewayPayload =
            serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();
        assert_eq!(hello.heartbeat_interval_ms(), 45_000);
        let bare: GatewayPayload = serde_json::from_str(r#"{"op":10}"#).unwrap();
        assert_eq!(bare.heartbeat_interval_ms(), DEFAULT_HEARTBEAT_MS);
    }

    #[test]
    fn identify_requests_message_content() {
        let id = identify_payload("tok");
        assert_eq!(id["op"], 2);
        assert_eq!(id["d"]["token"], "tok");
        let intents = id["d"]["intents"].as_u64().unwrap();
        assert_ne!(intents & (1 << 15), 0);
        assert_eq!(intents & (1 << 12), 0, "direct messages are not subscribed");
    }

    #[test]
    fn reply_body_threads_without_pinging() {
        let body = create_message_body("yo", Some(&MessageId::from("77")));
        assert_eq!(body["message_reference"]["message_id"], "77");
        assert_eq!(body["allowed_mentions"]["parse"], json!([]));
        assert_eq!(body["allowed_mentions"]["replied_user"], false);

        let plain = create_message_body("yo", None);
        assert!(plain.get("message_reference").is_none());
    }
}
