//! Vanguard Tools - process supervision and tool catalog
//!
//! This crate provides the process layer of the Vanguard engine:
//! - Supervisor: spawns attack tools, streams their output, kills them
//! - Catalog: declarative tool specs rendered into concrete commands
//! - Policy: operator allow-list checked before anything is spawned

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod policy;
pub mod supervisor;

pub use catalog::{Invocation, PreparedStep, SetupStep, ToolCatalog, ToolSpec};
pub use error::{Error, Result};
pub use policy::{CommandPolicy, DEFAULT_ALLOWED_PROGRAMS};
pub use supervisor::{
    ExitOutcome, Notification, NotificationLevel, ProcessCallbacks, ProcessContext,
    ProcessHandle, ProcessInfo, ProcessSpec, ProcessState, ProcessStatus, ProcessSupervisor,
    SupervisorConfig, SweepReport, TerminationCause,
};
