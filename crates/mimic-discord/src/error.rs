/// Gateway session failures.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("gateway connection failed: {0}")]
    Connect(String),

    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// Closed with a code that reconnecting cannot fix.
    #[error("gateway closed with fatal code {code}: {reason}")]
    Fatal { code: u16, reason: String },

    /// Closed with a recoverable code.
    #[error("gateway closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("gateway rejected the session")]
    InvalidSession,

    #[error("gave up after {0} reconnect attempts")]
    ReconnectsExhausted(u32),

    #[error("malformed gateway payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ChannelError {
    /// Errors that need operator action (bad token, missing intents).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::ReconnectsExhausted(_))
    }
}

/// Classify a gateway close code.
pub fn close_error(code: u16, reason: impl Into<String>) -> ChannelError {
    let reason = reason.into();
    match code {
        // Authentication failed, disallowed intents.
        4004 | 4014 => ChannelError::Fatal { code, reason },
        _ => ChannelError::Closed { code, reason },
    }
}
