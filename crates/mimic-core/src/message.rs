use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, UserId};

/// An inbound chat message as seen by the pipeline. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    #[serde(default)]
    pub mentions: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::from_raw(id),
            channel_id: ChannelId::from_raw(channel_id),
            author_id: UserId::from_raw(author_id),
            author_name: author_name.into(),
            author_is_bot: false,
            content: content.into(),
            mentions: BTreeSet::new(),
            reply_to: None,
            timestamp,
        }
    }

    pub fn with_mentions<I, S>(mut self, mentions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentions = mentions.into_iter().map(UserId::from_raw).collect();
        self
    }

    pub fn with_reply_to(mut self, target: impl Into<String>) -> Self {
        self.reply_to = Some(MessageId::from_raw(target));
        self
    }

    pub fn from_bot(mut self) -> Self {
        self.author_is_bot = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let msg = Message::new("1", "c", "u", "Alice", "hi", Utc::now())
            .with_mentions(["9", "8"])
            .with_reply_to("0");
        assert_eq!(msg.mentions.len(), 2);
        assert!(msg.mentions.contains(&UserId::from("9")));
        assert_eq!(msg.reply_to, Some(MessageId::from("0")));
        assert!(!msg.author_is_bot);
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let json = r#"{
            "id": "1", "channel_id": "c", "author_id": "u", "author_name": "Bob",
            "content": "yo", "timestamp": "2024-05-01T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(msg.mentions.is_empty());
        assert!(msg.reply_to.is_none());
    }
}
