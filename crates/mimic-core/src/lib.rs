pub mod chat;
pub mod errors;
pub mod ids;
pub mod message;
pub mod persona;
pub mod prompt;
pub mod provider;
pub mod response;
pub mod status;
