mod metrics;

pub use metrics::{
    HistogramSummary, MetricsSnapshot, PipelineMetrics, COMPLETION_LATENCY_MS,
    DISPATCH_FAILURES, MESSAGES_RECEIVED, PROVIDER_FAILURES, RESPONSES_DISPATCHED,
    RESPONSES_SUPPRESSED,
};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output encoding for stdout logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Json,
    Pretty,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "mimic_discord" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub output: LogOutput,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            output: LogOutput::Json,
        }
    }
}

impl TelemetryConfig {
    /// Build from the string forms used in settings; unknown levels fall back to INFO.
    pub fn from_strings(level: &str, module_levels: &[(String, String)], output: LogOutput) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            module_levels: module_levels
                .iter()
                .filter_map(|(module, lvl)| parse_level(lvl).map(|l| (module.clone(), l)))
                .collect(),
            output,
        }
    }

    fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Parse `trace|debug|info|warn|warning|error`, case-insensitive.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" | "critical" => Some(Level::ERROR),
        _ => None,
    }
}

/// Handle returned by [`init_telemetry`]; owns the process-wide counters.
pub struct TelemetryGuard {
    metrics: Arc<PipelineMetrics>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
///
/// A second call leaves the existing subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        LogOutput::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
        LogOutput::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("mimic-telemetry: subscriber already set: {e}");
    }

    TelemetryGuard {
        metrics: Arc::new(PipelineMetrics::new()),
    }
}
