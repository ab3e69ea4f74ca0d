use secrecy::SecretString;

use crate::errors::{Result, SettingsError};

pub const BOT_TOKEN_KEY: &str = "DISCORD_BOT_TOKEN";
pub const LLM_API_KEY: &str = "OPENROUTER_API_KEY";

/// The two secrets the process cannot start without.
#[derive(Clone)]
pub struct Credentials {
    pub bot_token: SecretString,
    pub llm_api_key: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_token", &"[REDACTED]")
            .field("llm_api_key", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve credentials through an arbitrary key lookup. Blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
                .ok_or(SettingsError::MissingCredential(key))
        };
        Ok(Self {
            bot_token: read(BOT_TOKEN_KEY)?,
            llm_api_key: read(LLM_API_KEY)?,
        })
    }
}
