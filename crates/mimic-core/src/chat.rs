use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::DispatchError;
use crate::ids::{ChannelId, MessageId};

/// Outbound primitives the pipeline needs from the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a plain message into a channel. Returns the id of the posted message.
    async fn send(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId, DispatchError>;

    /// Post a message threaded onto `target`.
    async fn reply(
        &self,
        channel_id: &ChannelId,
        target: &MessageId,
        text: &str,
    ) -> Result<MessageId, DispatchError>;

    /// Show a "typing" indicator while a response is generated.
    async fn typing(&self, _channel_id: &ChannelId) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// One captured outbound call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Send {
        channel_id: ChannelId,
        text: String,
    },
    Reply {
        channel_id: ChannelId,
        target: MessageId,
        text: String,
    },
}

impl Dispatched {
    pub fn text(&self) -> &str {
        match self {
            Self::Send { text, .. } | Self::Reply { text, .. } => text,
        }
    }
}

/// Chat client that records every call instead of talking to a platform.
/// Optionally fails every dispatch, for exercising the drop-on-failure path.
#[derive(Default)]
pub struct RecordingChatClient {
    calls: Mutex<Vec<Dispatched>>,
    fail_with: Option<DispatchError>,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DispatchError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<Dispatched> {
        self.calls.lock().clone()
    }

    fn push(&self, call: Dispatched) -> Result<MessageId, DispatchError> {
        let mut calls = self.calls.lock();
        calls.push(call);
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(MessageId::from_raw(format!("sent-{}", calls.len()))),
        }
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn send(&self, channel_id: &ChannelId, text: &str) -> Result<MessageId, DispatchError> {
        self.push(Dispatched::Send {
            channel_id: channel_id.clone(),
            text: text.to_string(),
        })
    }

    async fn reply(
        &self,
        channel_id: &ChannelId,
        target: &MessageId,
        text: &str,
    ) -> Result<MessageId, DispatchError> {
        self.push(Dispatched::Reply {
            channel_id: channel_id.clone(),
            target: target.clone(),
            text: text.to_string(),
        })
    }
}
