//! Discord adapter: a gateway session that feeds inbound guild messages to
//! the pipeline, and a REST client implementing [`ChatClient`](mimic_core::chat::ChatClient).

pub mod error;
pub mod gateway;
pub mod rest;
pub mod types;

pub use error::ChannelError;
pub use gateway::{Gateway, GatewayConfig, DEFAULT_GATEWAY_URL};
pub use rest::{DiscordRest, DEFAULT_API_BASE};
