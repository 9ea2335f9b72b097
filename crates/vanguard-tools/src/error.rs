//! Error types for vanguard-tools

use thiserror::Error;

/// Tool and process error type
#[derive(Debug, Error)]
pub enum Error {
    /// Command rejected by the operator allow-list before anything was spawned
    #[error("command not permitted: {0}")]
    PolicyViolation(String),

    /// No live process registered under the given external id
    #[error("process not found: {0}")]
    NotFound(String),

    /// Tool name absent from the catalog
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// OS refused to spawn the process
    #[error("failed to spawn '{command}': {message}")]
    Spawn {
        /// Command line that was attempted
        command: String,
        /// Underlying OS error
        message: String,
    },

    /// Process ran but did not succeed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Invalid input (unresolvable template, malformed parameters)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
