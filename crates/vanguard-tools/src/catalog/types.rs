//! Catalog entry types

use serde::{Deserialize, Serialize};

use crate::supervisor::ProcessSpec;

/// One setup command run before a tool's main command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStep {
    /// Short name, used to label the auxiliary terminal
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Program to run
    pub program: String,
    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,
}

/// Declarative description of how to invoke an attack tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool identifier referenced by attacks
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Program for the main command
    pub program: String,
    /// Argument templates for the main command
    #[serde(default)]
    pub args: Vec<String>,
    /// Container name template when the tool runs inside docker
    #[serde(default)]
    pub container: Option<String>,
    /// Long-lived helpers (listeners, servers) started in their own terminals
    #[serde(default)]
    pub pre_commands: Vec<SetupStep>,
    /// Commands that must finish successfully, in order, before the main command
    #[serde(default)]
    pub init_commands: Vec<SetupStep>,
}

impl ToolSpec {
    /// Whether the tool needs any setup before its main command
    #[must_use]
    pub fn is_multi_stage(&self) -> bool {
        !self.pre_commands.is_empty() || !self.init_commands.is_empty()
    }
}

/// A setup step with its templates resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStep {
    /// Step name
    pub name: String,
    /// Step description
    pub description: String,
    /// Command to spawn
    pub spec: ProcessSpec,
}

/// Fully resolved invocation of a tool against a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Tool identifier
    pub tool: String,
    /// Main command
    pub main: ProcessSpec,
    /// Helpers to launch first
    pub pre: Vec<PreparedStep>,
    /// Commands to run to completion before `main`
    pub init: Vec<PreparedStep>,
    /// Container to clean up when the main process is killed
    pub container: Option<String>,
}
