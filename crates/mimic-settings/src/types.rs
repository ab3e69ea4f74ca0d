//! Settings types. Every struct deserializes from camelCase JSON and fills
//! missing fields from its `Default`.

use std::str::FromStr;

use mimic_core::ids::UserId;
use mimic_core::persona::{Lexicon, PersonaIdentity, Tunables};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MimicSettings {
    pub persona: PersonaSettings,
    pub llm: LlmSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub discord: DiscordSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonaSettings {
    /// User id of the impersonated individual.
    pub identity_id: String,
    pub identity_name: String,
    pub prompt_path: String,
    /// Messages starting with this prefix are admin commands.
    pub admin_prefix: String,
    /// Users besides the identity allowed to run admin commands.
    pub admin_ids: Vec<String>,
    pub tunables: Tunables,
    pub lexicon: Lexicon,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            identity_id: "0".to_string(),
            identity_name: "persona".to_string(),
            prompt_path: "persona/systemprompt.md".to_string(),
            admin_prefix: "!py".to_string(),
            admin_ids: Vec::new(),
            tunables: Tunables::default(),
            lexicon: Lexicon::default(),
        }
    }
}

impl PersonaSettings {
    pub fn identity(&self) -> PersonaIdentity {
        PersonaIdentity {
            id: UserId::from_raw(self.identity_id.clone()),
            name: self.identity_name.clone(),
        }
    }

    pub fn admins(&self) -> Vec<UserId> {
        self.admin_ids
            .iter()
            .map(|id| UserId::from_raw(id.clone()))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Overall budget for one completion, retries included.
    pub completion_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "google/gemini-2.0-flash-exp".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            request_timeout_secs: 30,
            completion_timeout_secs: 45,
            max_retries: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub health_port: u16,
    /// How often the idle sweep looks for channels to initiate into.
    pub idle_sweep_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            health_port: 8080,
            idle_sweep_secs: 600,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    /// Per-target overrides, e.g. `[["mimic_discord", "debug"]]`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            module_levels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordSettings {
    pub gateway_url: String,
    pub api_base: String,
    pub max_reconnect_attempts: u32,
    /// Show the typing indicator while a completion is in flight.
    pub typing_indicator: bool,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            api_base: "https://discord.com/api/v10".to_string(),
            max_reconnect_attempts: 8,
            typing_indicator: true,
        }
    }
}

impl MimicSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.persona.tunables;
        let probabilities = [
            ("baseProbability", t.base_probability),
            ("bonusOtherMention", t.bonus_other_mention),
            ("bonusQuestion", t.bonus_question),
            ("bonusTopic", t.bonus_topic),
            ("bonusIdle", t.bonus_idle),
            ("probabilityCap", t.probability_cap),
            ("initiationProbability", t.initiation_probability),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        let sizes = [
            ("contextWindowSize", t.context_window_size),
            ("maxContextMessages", t.max_context_messages),
            ("maxWords", t.max_words),
            ("maxChars", t.max_chars),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be at least 1")));
            }
        }
        if t.max_tokens == 0 {
            return Err(SettingsError::InvalidValue("maxTokens must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&t.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "temperature must be within [0, 2], got {}",
                t.temperature
            )));
        }
        if t.long_idle_threshold_secs < t.idle_threshold_secs {
            return Err(SettingsError::InvalidValue(
                "longIdleThresholdSecs must not be below idleThresholdSecs".into(),
            ));
        }
        if chrono_tz::Tz::from_str(&t.timezone).is_err() {
            return Err(SettingsError::InvalidValue(format!(
                "unknown timezone {}",
                t.timezone
            )));
        }
        if self.persona.identity_id.trim().is_empty() {
            return Err(SettingsError::InvalidValue("identityId must not be empty".into()));
        }
        if self.persona.admin_prefix.trim().is_empty() {
            return Err(SettingsError::InvalidValue("adminPrefix must not be empty".into()));
        }
        if self.server.idle_sweep_secs == 0 {
            return Err(SettingsError::InvalidValue("idleSweepSecs must be at least 1".into()));
        }
        if self.llm.completion_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "completionTimeoutSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
