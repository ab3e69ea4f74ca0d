pub mod aliases;
pub mod clock;
pub mod commands;
pub mod context_window;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod random;
pub mod rate_limit;
pub mod style;

pub use aliases::PersonaAliases;
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::AdminCommand;
pub use context_window::ContextWindow;
pub use error::EngineError;
pub use gate::{GateInput, ResponseGate, Signals};
pub use orchestrator::{Completion, CompletionOrchestrator, NoResponse};
pub use pipeline::{Engine, EngineConfig, EngineDeps, Handled};
pub use prompt::PromptBuilder;
pub use random::{FixedDraws, RandomSource, SeededRandom, ThreadRandom};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use style::{Limits, StyleValidator, SuppressReason, Validated};
