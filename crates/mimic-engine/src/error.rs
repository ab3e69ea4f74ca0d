/// Failures building the pipeline. Runtime failures never surface as errors:
/// they become log events and a silent non-response.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid lexicon pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid tunable: {0}")]
    InvalidTunable(String),
}
