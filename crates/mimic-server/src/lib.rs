pub mod handlers;
pub mod server;

pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
