//! Server module for Vanguard
//!
//! Contains the main server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `logging`: Tracing subscriber setup
//! - `background_tasks`: Sweepers and the event pump
//! - `init`: Main server initialization and run loop

mod background_tasks;
pub mod config;
mod init;
mod loader;
mod logging;

// Re-export public API
pub use config::AppConfig;
pub use init::run;
pub use loader::{load_config, DEFAULT_CONFIG};
pub use logging::init_logging;
