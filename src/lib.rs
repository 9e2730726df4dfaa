//! llm_gateway — OpenAI-compatible LLM provider gateway.
//!
//! Library crate shared by the `gateway`, `control-plane`, and `bridge`
//! binaries, and by integration tests under `tests/`.

pub mod bridge;
pub mod config;
pub mod control_plane;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logs;
pub mod providers;
pub mod session;
pub mod streaming;
pub mod supervisor;
pub mod utils;

/// Default data directory for the gateway's SQLite database and config.
///
/// Resolution order:
/// 1. `GATEWAY_HOME` environment variable
/// 2. `$HOME/.llm-gateway`
pub fn gateway_home() -> std::path::PathBuf {
    config::default_data_dir()
}
