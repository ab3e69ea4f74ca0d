use std::time::Duration;

/// Why a completion request to the model API produced no text.
///
/// `is_fatal` errors need operator action (key, credits, request shape);
/// `is_retryable` ones may succeed on the next attempt.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// 401/403: the API key was refused.
    #[error("api key rejected: {0}")]
    Unauthorized(String),
    /// 402: the account has no credits left.
    #[error("insufficient credits: {0}")]
    InsufficientCredits(String),
    /// Any other 4xx, or a request that could not be built.
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// 2xx whose body holds no usable completion.
    #[error("malformed completion: {0}")]
    MalformedCompletion(String),

    /// 429, with the `Retry-After` hint when the API sent one.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    /// 5xx, including the 502/503 returned when no upstream model is available.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {reason}")]
    Transport { reason: String, timed_out: bool },

    /// The circuit breaker is open; no request was sent.
    #[error("circuit open")]
    CircuitOpen,
}

impl GatewayError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
            timed_out: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Upstream { .. } | Self::Transport { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_)
                | Self::InsufficientCredits(_)
                | Self::Rejected { .. }
                | Self::MalformedCompletion(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Label used in logs and the `provider.failures` counter.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InsufficientCredits(_) => "insufficient_credits",
            Self::Rejected { .. } => "rejected",
            Self::MalformedCompletion(_) => "malformed_completion",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::Transport { timed_out: true, .. } => "request_timeout",
            Self::Transport { .. } => "transport",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Map a non-success HTTP status from the completions endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            402 => Self::InsufficientCredits(body),
            408 => Self::Transport {
                reason: format!("server timed out: {body}"),
                timed_out: true,
            },
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Upstream { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

/// Failure to deliver a message through the chat platform.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("chat platform rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("chat client not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            GatewayError::from_status(401, "no key".into()),
            GatewayError::Unauthorized(_)
        ));
        assert_eq!(
            GatewayError::from_status(402, "out of credits".into()).error_kind(),
            "insufficient_credits"
        );
        assert!(GatewayError::from_status(400, "bad model".into()).is_fatal());
        assert!(GatewayError::from_status(418, String::new()).is_fatal());
        assert!(GatewayError::from_status(502, "no provider".into()).is_retryable());
        assert!(GatewayError::from_status(429, String::new()).is_retryable());
    }

    #[test]
    fn server_side_timeout_is_retried() {
        let err = GatewayError::from_status(408, String::new());
        assert!(err.is_retryable());
        assert_eq!(err.error_kind(), "request_timeout");
    }

    #[test]
    fn open_circuit_is_neither_fatal_nor_retried() {
        assert!(!GatewayError::CircuitOpen.is_retryable());
        assert!(!GatewayError::CircuitOpen.is_fatal());
    }

    #[test]
    fn only_rate_limits_suggest_a_delay() {
        let hinted = GatewayError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(hinted.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(GatewayError::transport("reset").suggested_delay(), None);
    }
}
