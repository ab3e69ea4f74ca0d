//! Health and status payloads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mimic_core::status::{BotAccount, RuntimeStatus};
use mimic_telemetry::{MetricsSnapshot, PipelineMetrics};

pub const SERVICE_NAME: &str = "mimic";

/// Shared state available to all HTTP handlers.
pub struct HandlerState {
    pub status: Arc<RuntimeStatus>,
    pub metrics: Arc<PipelineMetrics>,
    pub model: String,
    pub started_at: DateTime<Utc>,
}

impl HandlerState {
    pub fn new(status: Arc<RuntimeStatus>, metrics: Arc<PipelineMetrics>, model: impl Into<String>) -> Self {
        Self {
            status,
            metrics,
            model: model.into(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub bot_connected: bool,
    pub bot_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_user: Option<BotAccount>,
    pub model: String,
    pub uptime_secs: i64,
    pub metrics: MetricsSnapshot,
}

/// `healthy` only while connected to the chat platform.
pub fn health(state: &HandlerState) -> (bool, HealthReport) {
    let healthy = state.status.is_healthy();
    (
        healthy,
        HealthReport {
            status: if healthy { "healthy" } else { "unavailable" },
            service: SERVICE_NAME,
            timestamp: Utc::now(),
        },
    )
}

pub fn status(state: &HandlerState) -> StatusReport {
    let paused = state.status.is_paused();
    StatusReport {
        status: if paused { "paused" } else { "running" },
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        bot_connected: state.status.is_connected(),
        bot_active: !paused,
        bot_user: state.status.account(),
        model: state.model.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        metrics: state.metrics.snapshot(),
    }
}
