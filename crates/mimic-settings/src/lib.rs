//! # mimic-settings
//!
//! Configuration for the persona bot, loaded once at startup.
//!
//! Settings are layered (in priority order):
//! 1. **Compiled defaults**: [`MimicSettings::default()`]
//! 2. **Settings file**: optional JSON (camelCase), deep-merged over defaults
//! 3. **Environment variables**: the bot's env keys (highest priority)
//!
//! Credentials never live in the settings file: [`Credentials::from_env`]
//! reads them from the environment and fails when either is missing.
//!
//! ```no_run
//! use mimic_settings::{load_settings_from_path, Credentials};
//!
//! let settings = load_settings_from_path(std::path::Path::new("settings.json")).unwrap();
//! let creds = Credentials::from_env().unwrap();
//! println!("model: {}", settings.llm.model);
//! # let _ = creds;
//! ```

#![deny(unsafe_code)]

pub mod credentials;
pub mod errors;
pub mod loader;
pub mod types;

pub use credentials::Credentials;
pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings_from_path,
    load_settings_with, settings_path,
};
pub use types::*;
