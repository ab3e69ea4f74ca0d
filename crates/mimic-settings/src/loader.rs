//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MimicSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::MimicSettings;

/// Env var naming an alternative settings file.
pub const SETTINGS_PATH_ENV: &str = "MIMIC_SETTINGS";

/// Resolve the settings file path: `$MIMIC_SETTINGS`, else `./settings.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(SETTINGS_PATH_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("settings.json"), PathBuf::from)
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MimicSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_settings_from_path`] with an explicit env lookup.
pub fn load_settings_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<MimicSettings> {
    let defaults = serde_json::to_value(MimicSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MimicSettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, lookup);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut MimicSettings) {
    apply_env_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, falling back to file/default.
pub fn apply_env_overrides_from(
    settings: &mut MimicSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Persona identity ────────────────────────────────────────────
    if let Some(v) = env.string("TARGET_USER_ID") {
        settings.persona.identity_id = v;
    }
    if let Some(v) = env.string("TARGET_USER_NAME") {
        settings.persona.identity_name = v;
    }
    if let Some(v) = env.string("PERSONA_PROMPT_PATH") {
        settings.persona.prompt_path = v;
    }

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = env.string("OPENROUTER_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.u64("OPENROUTER_MAX_TOKENS", 1, 4096) {
        settings.persona.tunables.max_tokens = v as u32;
    }
    if let Some(v) = env.f64("OPENROUTER_TEMPERATURE", 0.0, 2.0) {
        settings.persona.tunables.temperature = v;
    }

    // ── Rate limit ──────────────────────────────────────────────────
    // RATE_LIMIT_MESSAGES is the older name for the same interval.
    let interval = env
        .u64("RATE_LIMIT_SECONDS", 0, 86_400)
        .or_else(|| env.u64("RATE_LIMIT_MESSAGES", 0, 86_400));
    if let Some(v) = interval {
        settings.persona.tunables.min_interval_secs = v;
    }

    // ── Ops ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_LEVEL") {
        settings.logging.level = v.to_lowercase();
    }
    if let Some(v) = env.string("LOG_FORMAT") {
        if let Ok(format) = serde_json::from_value(Value::String(v.to_lowercase())) {
            settings.logging.format = format;
        }
    }
    if let Some(v) = env.u16("HEALTH_PORT", 1, 65535) {
        settings.server.health_port = v;
    }
    if let Some(v) = env.bool("DISCORD_TYPING") {
        settings.discord.typing_indicator = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = self.string(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
