//! Rolling per-channel message history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use mimic_core::ids::{ChannelId, MessageId, UserId};
use mimic_core::message::Message;

/// The last `capacity` messages of every channel seen, oldest first.
///
/// Channels are created lazily on first append and live for the process
/// lifetime. Each channel sits behind its own shard lock, so appends on
/// different channels never contend.
pub struct ContextWindow {
    capacity: usize,
    channels: DashMap<ChannelId, VecDeque<Message>>,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Insert at the tail, evicting from the head past capacity.
    pub fn append(&self, message: Message) {
        let mut entry = self
            .channels
            .entry(message.channel_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        entry.push_back(message);
        while entry.len() > self.capacity {
            let _ = entry.pop_front();
        }
    }

    /// Record a message the persona itself dispatched, so later transcripts
    /// and continuation checks can see it.
    pub fn record_own(
        &self,
        channel_id: &ChannelId,
        message_id: MessageId,
        author: (&UserId, &str),
        text: &str,
        now: DateTime<Utc>,
    ) {
        let (author_id, author_name) = author;
        self.append(Message {
            id: message_id,
            channel_id: channel_id.clone(),
            author_id: author_id.clone(),
            author_name: author_name.to_string(),
            author_is_bot: false,
            content: text.to_string(),
            mentions: Default::default(),
            reply_to: None,
            timestamp: now,
        });
    }

    /// Ordered copy of a channel's history; empty for unknown channels.
    pub fn snapshot(&self, channel_id: &ChannelId) -> Vec<Message> {
        self.channels
            .get(channel_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Timestamp of the newest message held for a channel.
    pub fn last_activity(&self, channel_id: &ChannelId) -> Option<DateTime<Utc>> {
        self.channels
            .get(channel_id)
            .and_then(|q| q.back().map(|m| m.timestamp))
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }
}
