//! The scheduler that owns the listener and every live connection.

mod config;
mod listener;

#[allow(clippy::module_inception)]
mod server;

pub use config::ServerConfig;
pub use listener::Listen;
pub use server::{Server, ServerBuildError, ServerBuilder};
