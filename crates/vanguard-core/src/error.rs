//! Error types for vanguard-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown scenario, campaign, attack or process id
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Requested id
        id: String,
    },

    /// Operation not valid for the entity's current status
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Command rejected by the allow-list
    #[error("policy violation: {0}")]
    Policy(String),

    /// Execution failed
    #[error("execution error: {0}")]
    Execution(String),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(String),

    /// Tool or process error
    #[error("tool error: {0}")]
    Tool(#[from] vanguard_tools::Error),

    /// Internal error (serialization, poisoned state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Unknown scenario
    pub fn scenario_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "scenario",
            id: id.into(),
        }
    }

    /// Unknown campaign
    pub fn campaign_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "campaign",
            id: id.into(),
        }
    }

    /// Stable machine-readable code for the HTTP and WebSocket layers
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Policy(_) => "policy_violation",
            Self::Execution(_) => "execution_failed",
            Self::Store(_) => "store_error",
            Self::Internal(_) => "internal_error",
            Self::Tool(inner) => match inner {
                vanguard_tools::Error::PolicyViolation(_) => "policy_violation",
                vanguard_tools::Error::NotFound(_) | vanguard_tools::Error::UnknownTool(_) => {
                    "not_found"
                }
                _ => "execution_failed",
            },
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {}", e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Error::scenario_not_found("s1").code(), "not_found");
        assert_eq!(Error::InvalidState("x".into()).code(), "invalid_state");
        assert_eq!(Error::Store("x".into()).code(), "store_error");
        let policy: Error = vanguard_tools::Error::PolicyViolation("rm".into()).into();
        assert_eq!(policy.code(), "policy_violation");
        let unknown: Error = vanguard_tools::Error::UnknownTool("zmap".into()).into();
        assert_eq!(unknown.code(), "not_found");
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::campaign_not_found("c-42");
        assert_eq!(err.to_string(), "campaign not found: c-42");
    }
}
