//! Process supervisor types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::policy::DEFAULT_ALLOWED_PROGRAMS;

/// A command to spawn: program plus discrete arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Program name or path
    pub program: String,
    /// Arguments, passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Program with arguments
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Free-form command line run through `sh -c`
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), line.into()])
    }

    /// Space-joined command line, used for policy checks and logging
    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Registry status of a live handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Process is running
    Running,
    /// Timed out
    Failed,
    /// Terminated on request
    Killed,
}

/// Answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// No live or recently finished process under this id
    NotFound,
    /// Still running
    Running,
    /// Exited with code 0
    Completed,
    /// Exited with a non-zero code or a signal
    Failed,
}

impl ProcessState {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Why the supervisor ended a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum TerminationCause {
    /// `stop` was called
    Stopped,
    /// `kill_process` was called
    Killed(String),
    /// No output for longer than the inactivity threshold
    TimedOut,
    /// Service shutdown
    Shutdown,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Killed(reason) => write!(f, "killed: {}", reason),
            Self::TimedOut => write!(f, "terminated after inactivity timeout"),
            Self::Shutdown => write!(f, "terminated by shutdown"),
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    /// Exit code, `None` when ended by a signal
    pub code: Option<i32>,
    /// True iff the exit code was zero
    pub success: bool,
    /// Set when the supervisor ended the process
    pub cause: Option<TerminationCause>,
}

impl ExitOutcome {
    pub(crate) fn from_code(code: Option<i32>, cause: Option<TerminationCause>) -> Self {
        Self {
            code,
            success: code == Some(0),
            cause,
        }
    }

    /// The exit was observed without a status (wait error, lost monitor)
    pub(crate) fn lost(cause: Option<TerminationCause>) -> Self {
        Self {
            code: None,
            success: false,
            cause,
        }
    }

    /// Query-facing state for this outcome
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.success {
            ProcessState::Completed
        } else {
            ProcessState::Failed
        }
    }

    /// One-line human description
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.cause, self.code) {
            (Some(cause), _) => format!("process {}", cause),
            (None, Some(0)) => "process exited successfully".to_string(),
            (None, Some(code)) => format!("process exited with code {}", code),
            (None, None) => "process terminated by signal".to_string(),
        }
    }
}

/// Severity of a process notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Informational
    Info,
    /// Process finished successfully
    Success,
    /// Process failed
    Error,
}

/// Lifecycle notification emitted to the starter of a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Severity
    pub level: NotificationLevel,
    /// Message text
    pub message: String,
}

impl Notification {
    /// Build a notification
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Per-line callback
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Notification callback
pub type NotificationCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// Sinks for a process's stdout lines, stderr lines and lifecycle notifications
#[derive(Clone)]
pub struct ProcessCallbacks {
    /// Called once per stdout line
    pub on_output: LineCallback,
    /// Called once per stderr line, and for supervisor-generated error text
    pub on_error: LineCallback,
    /// Called on exit and on supervisor intervention
    pub on_notification: NotificationCallback,
}

impl ProcessCallbacks {
    /// Bundle three callbacks
    pub fn new(
        on_output: impl Fn(&str) + Send + Sync + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
        on_notification: impl Fn(Notification) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_output: Arc::new(on_output),
            on_error: Arc::new(on_error),
            on_notification: Arc::new(on_notification),
        }
    }

    /// Discard everything
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| {}, |_| {}, |_| {})
    }
}

impl fmt::Debug for ProcessCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCallbacks").finish_non_exhaustive()
    }
}

/// Optional ownership context attached to a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessContext {
    /// Owning scenario
    pub scenario_id: Option<String>,
    /// Owning attack
    pub attack_id: Option<String>,
    /// Tool name, for logs and notifications
    pub tool: Option<String>,
    /// Container to clean up when the process is killed
    pub container_id: Option<String>,
}

/// Descriptive view of a registered process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    /// External id ("tabId")
    pub tab_id: String,
    /// OS process id
    pub pid: Option<u32>,
    /// Command line
    pub command: String,
    /// Ownership context
    pub context: ProcessContext,
    /// Spawn time
    pub started_at: DateTime<Utc>,
}

impl ProcessInfo {
    /// Tool name or, failing that, the program name
    #[must_use]
    pub fn label(&self) -> &str {
        self.context
            .tool
            .as_deref()
            .unwrap_or_else(|| self.command.split_whitespace().next().unwrap_or("process"))
    }
}

/// Returned by [`super::ProcessSupervisor::start`]; awaits the process exit
/// independently of the registry entry.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub(crate) info: ProcessInfo,
    pub(crate) exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// External id
    #[must_use]
    pub fn tab_id(&self) -> &str {
        &self.info.tab_id
    }

    /// OS process id
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.info.pid
    }

    /// Process details
    #[must_use]
    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    /// Outcome if the process already exited
    #[must_use]
    pub fn try_outcome(&self) -> Option<ExitOutcome> {
        self.exit_rx.borrow().clone()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> ExitOutcome {
        wait_exit(&mut self.exit_rx).await
    }
}

pub(crate) async fn wait_exit(rx: &mut watch::Receiver<Option<ExitOutcome>>) -> ExitOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or_else(|| ExitOutcome::lost(None)),
        Err(_) => ExitOutcome::lost(None),
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Program names a command line must contain to be spawned
    pub allowed_programs: Vec<String>,
    /// Interval between sweeps
    pub sweep_interval: Duration,
    /// Silence after which a running process is force-killed
    pub inactivity_timeout: Duration,
    /// Wait between SIGTERM and SIGKILL in `kill_process`
    pub kill_grace: Duration,
    /// Wait between `docker stop` and `docker rm`
    pub container_remove_delay: Duration,
    /// How long finished processes stay queryable
    pub finished_retention: Duration,
    /// How long to wait for output readers after the process exits
    pub reader_drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            allowed_programs: DEFAULT_ALLOWED_PROGRAMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            sweep_interval: Duration::from_secs(60),
            inactivity_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(5),
            container_remove_delay: Duration::from_secs(2),
            finished_retention: Duration::from_secs(600),
            reader_drain_timeout: Duration::from_secs(2),
        }
    }
}

impl SupervisorConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the allow-list
    pub fn with_allowed_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_programs = programs.into_iter().map(Into::into).collect();
        self
    }

    /// Set sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set inactivity timeout
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set SIGTERM → SIGKILL grace period
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set container removal delay
    pub fn with_container_remove_delay(mut self, delay: Duration) -> Self {
        self.container_remove_delay = delay;
        self
    }

    /// Set finished-process retention
    pub fn with_finished_retention(mut self, retention: Duration) -> Self {
        self.finished_retention = retention;
        self
    }
}

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids force-killed for inactivity
    pub timed_out: Vec<String>,
    /// Ids removed because their process had already exited
    pub zombies: Vec<String>,
    /// Finished entries dropped from the status cache
    pub expired: usize,
}
