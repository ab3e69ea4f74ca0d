//! The persona being impersonated: identity, prompt text, lexicon and tunables.
//!
//! A [`PersonaProfile`] is built once at startup and shared read-only
//! (`Arc<PersonaProfile>`) by every pipeline component.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Placeholder inside the persona text that the prompt builder replaces with
/// situational context (local time). At most one is honoured.
pub const CONTEXT_PLACEHOLDER: &str = "{{context}}";

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("persona prompt not found at {0}")]
    NotFound(String),
    #[error("persona prompt at {0} is empty")]
    Empty(String),
    #[error("failed to read persona prompt: {0}")]
    Io(#[from] std::io::Error),
}

/// Who the persona is on the chat platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaIdentity {
    /// The impersonated individual's user id.
    pub id: UserId,
    /// Display name, used for transcript labels and `@name` detection.
    pub name: String,
}

/// Mandatory and forbidden vocabulary enforced by the style validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lexicon {
    /// Whole-word, case-insensitive rewrites applied to every response
    /// (`"because" -> "cuz"`). Replacements must not themselves contain a
    /// source phrase, or repeated validation would keep rewriting.
    pub substitutions: Vec<(String, String)>,
    /// Terms that cause a response to be suppressed outright.
    pub denylist: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        let subs = [
            ("you", "u"),
            ("your", "ur"),
            ("because", "cuz"),
            ("for real", "fr"),
            ("though", "tho"),
            ("something", "smth"),
            ("want to", "wanna"),
            ("going to", "gonna"),
            ("don't know", "idk"),
        ];
        Self {
            substitutions: subs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            denylist: Vec::new(),
        }
    }
}

/// Numeric and list tunables for the gate, limiter, builder and validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tunables {
    pub base_probability: f64,
    pub bonus_other_mention: f64,
    pub bonus_question: f64,
    pub bonus_topic: f64,
    pub bonus_idle: f64,
    /// Upper bound applied after clamping to [0, 1]. Direct mentions ignore it.
    pub probability_cap: f64,
    pub idle_threshold_secs: u64,
    pub long_idle_threshold_secs: u64,
    pub initiation_probability: f64,
    pub min_interval_secs: u64,
    pub mention_bypasses_interval: bool,
    pub per_user_interval_secs: Option<u64>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub context_window_size: usize,
    pub max_context_messages: usize,
    pub max_words: usize,
    pub max_chars: usize,
    pub topic_keywords: Vec<String>,
    pub interrogatives: Vec<String>,
    pub timezone: String,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            base_probability: 0.25,
            bonus_other_mention: 0.3,
            bonus_question: 0.3,
            bonus_topic: 0.3,
            bonus_idle: 0.2,
            probability_cap: 0.85,
            idle_threshold_secs: 2 * 3600,
            long_idle_threshold_secs: 4 * 3600,
            initiation_probability: 0.1,
            min_interval_secs: 30,
            mention_bypasses_interval: true,
            per_user_interval_secs: None,
            max_tokens: 150,
            temperature: 0.8,
            context_window_size: 20,
            max_context_messages: 20,
            max_words: 25,
            max_chars: 400,
            topic_keywords: ["valorant", "minecraft", "game", "play", "rank", "clutch", "gg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            interrogatives: [
                "who", "what", "whats", "what's", "when", "where", "why", "how", "which",
                "is", "are", "do", "does", "did", "can", "could", "should", "would", "will",
                "wanna",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timezone: "America/Chicago".to_string(),
        }
    }
}

/// Immutable, process-wide persona configuration.
#[derive(Clone, Debug)]
pub struct PersonaProfile {
    pub identity: PersonaIdentity,
    /// Persona text, included verbatim as the system portion of every prompt.
    pub system_prompt: String,
    pub lexicon: Lexicon,
    pub tunables: Tunables,
}

impl PersonaProfile {
    pub fn new(
        identity: PersonaIdentity,
        system_prompt: impl Into<String>,
        lexicon: Lexicon,
        tunables: Tunables,
    ) -> Self {
        Self {
            identity,
            system_prompt: system_prompt.into(),
            lexicon,
            tunables,
        }
    }

    /// Read the persona text asset. Missing or blank files are configuration errors.
    pub fn load_prompt(path: &Path) -> Result<String, PersonaError> {
        if !path.exists() {
            return Err(PersonaError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PersonaError::Empty(path.display().to_string()));
        }
        Ok(text.to_string())
    }
}
