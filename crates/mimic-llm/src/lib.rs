pub mod openrouter;
pub mod reliable;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
