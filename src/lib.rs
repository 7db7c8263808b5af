pub mod assets;
pub mod config;
pub mod config_script;
pub mod conversation;
pub mod inference;
pub mod port;
pub mod server;
pub mod ws;

pub use server::{create_router, Server};

/// Crate version reported by `/version` and `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
