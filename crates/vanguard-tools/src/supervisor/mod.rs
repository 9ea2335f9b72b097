//! Process supervisor
//!
//! Spawns external tools under an external id (the "tab id"), streams their
//! stdout/stderr line by line into caller-supplied callbacks, and keeps a
//! registry of live processes. Each process runs as the leader of its own
//! process group so stop/kill reach everything it forked.
//!
//! A background sweep force-kills processes that have been silent for longer
//! than the inactivity threshold and drops registry entries whose process
//! already exited.

mod container;
mod lines;
mod signal;
mod types;


pub use types::{
    ExitOutcome, LineCallback, Notification, NotificationCallback, NotificationLevel,
    ProcessCallbacks, ProcessContext, ProcessHandle, ProcessInfo, ProcessSpec, ProcessState,
    ProcessStatus, SupervisorConfig, SweepReport, TerminationCause,
};

use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::policy::CommandPolicy;
use lines::{now_millis, pump_lines};
use signal::Signal;
use types::wait_exit;

#[derive(Clone)]
struct ProcessEntry {
    run_id: Uuid,
    info: ProcessInfo,
    status: ProcessStatus,
    last_activity: Arc<AtomicI64>,
    cause: Arc<OnceLock<TerminationCause>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    callbacks: ProcessCallbacks,
}

impl ProcessEntry {
    fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
            || self.exit_rx.has_changed().is_err()
            || self.info.pid.is_some_and(|pid| !signal::is_alive(pid))
    }
}

struct FinishedProcess {
    outcome: ExitOutcome,
    finished_at: Instant,
}

/// Everything the exit monitor needs once the process is spawned
struct Monitor {
    tab_id: String,
    run_id: Uuid,
    label: String,
    readers: Vec<JoinHandle<u64>>,
    drain_timeout: Duration,
    cause: Arc<OnceLock<TerminationCause>>,
    callbacks: ProcessCallbacks,
    processes: Arc<DashMap<String, ProcessEntry>>,
    finished: Arc<DashMap<String, FinishedProcess>>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
}

/// Registry and lifecycle manager for spawned tool processes
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    policy: CommandPolicy,
    processes: Arc<DashMap<String, ProcessEntry>>,
    finished: Arc<DashMap<String, FinishedProcess>>,
}

impl ProcessSupervisor {
    /// Create a supervisor
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        let policy = CommandPolicy::new(config.allowed_programs.iter().cloned());
        Self {
            config,
            policy,
            processes: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
        }
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Spawn `spec` under `tab_id`.
    ///
    /// A process already registered under the same id is stopped first.
    /// Fails with [`Error::PolicyViolation`] before spawning when the command
    /// line matches no allowed program.
    #[instrument(skip(self, spec, callbacks, context), fields(command = %spec.command_line()))]
    pub async fn start(
        &self,
        tab_id: &str,
        spec: ProcessSpec,
        callbacks: ProcessCallbacks,
        context: ProcessContext,
    ) -> Result<ProcessHandle> {
        let command_line = spec.command_line();
        if let Err(e) = self.policy.check(&command_line) {
            warn!(tab_id = %tab_id, "Rejected command outside the allow-list");
            return Err(e);
        }

        if self.processes.contains_key(tab_id) {
            info!(tab_id = %tab_id, "Replacing running process");
            self.stop(tab_id, None).await;
        }
        self.finished.remove(tab_id);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(tab_id = %tab_id, error = %e, "Failed to spawn process");
                (callbacks.on_notification)(Notification::new(
                    NotificationLevel::Error,
                    format!("Failed to start {}: {}", spec.program, e),
                ));
                return Err(Error::Spawn {
                    command: command_line,
                    message: e.to_string(),
                });
            }
        };

        let info = ProcessInfo {
            tab_id: tab_id.to_string(),
            pid: child.id(),
            command: command_line,
            context,
            started_at: Utc::now(),
        };
        let run_id = Uuid::new_v4();
        let last_activity = Arc::new(AtomicI64::new(now_millis()));
        let cause = Arc::new(OnceLock::new());
        let (exit_tx, exit_rx) = watch::channel(None);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(
                stdout,
                callbacks.on_output.clone(),
                last_activity.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(
                stderr,
                callbacks.on_error.clone(),
                last_activity.clone(),
            )));
        }

        self.processes.insert(
            tab_id.to_string(),
            ProcessEntry {
                run_id,
                info: info.clone(),
                status: ProcessStatus::Running,
                last_activity,
                cause: cause.clone(),
                exit_rx: exit_rx.clone(),
                callbacks: callbacks.clone(),
            },
        );

        let monitor = Monitor {
            tab_id: tab_id.to_string(),
            run_id,
            label: info.label().to_string(),
            readers,
            drain_timeout: self.config.reader_drain_timeout,
            cause,
            callbacks,
            processes: self.processes.clone(),
            finished: self.finished.clone(),
            exit_tx,
        };
        tokio::spawn(monitor.run(child));

        info!(tab_id = %tab_id, pid = ?info.pid, "Process started");
        Ok(ProcessHandle { info, exit_rx })
    }

    /// Wait until the process under `tab_id` exits.
    ///
    /// Returns the remembered outcome for a recently finished process.
    pub async fn wait_for(&self, tab_id: &str) -> Result<ExitOutcome> {
        let rx = self.processes.get(tab_id).map(|e| e.exit_rx.clone());
        match rx {
            Some(mut rx) => Ok(wait_exit(&mut rx).await),
            None => self
                .finished
                .get(tab_id)
                .map(|f| f.outcome.clone())
                .ok_or_else(|| Error::NotFound(tab_id.to_string())),
        }
    }

    /// Current state of `tab_id`
    #[must_use]
    pub fn status(&self, tab_id: &str) -> ProcessState {
        if let Some(entry) = self.processes.get(tab_id) {
            let outcome = entry.exit_rx.borrow().clone();
            return outcome.map_or(ProcessState::Running, |o| o.state());
        }
        self.finished
            .get(tab_id)
            .map(|f| f.outcome.state())
            .unwrap_or(ProcessState::NotFound)
    }

    /// Whether `tab_id` has a live process
    #[must_use]
    pub fn is_running(&self, tab_id: &str) -> bool {
        self.status(tab_id) == ProcessState::Running
    }

    /// Batch status query, in request order
    pub fn statuses<I, S>(&self, tab_ids: I) -> Vec<(String, ProcessState)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tab_ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.status(id))
            })
            .collect()
    }

    /// Number of registered processes
    #[must_use]
    pub fn count(&self) -> usize {
        self.processes.len()
    }

    /// Stop the process under `tab_id`.
    ///
    /// When `port` is given, whatever listens on it is terminated first. The
    /// process group receives SIGTERM and the entry is deregistered whatever
    /// the signal outcome. Returns `false` for an unknown id.
    pub async fn stop(&self, tab_id: &str, port: Option<u16>) -> bool {
        if let Some(port) = port {
            if let Err(e) = signal::kill_port(port).await {
                warn!(tab_id = %tab_id, port, error = %e, "Failed to free port");
            }
        }

        let Some((_, entry)) = self.processes.remove(tab_id) else {
            debug!(tab_id = %tab_id, "Stop requested for unknown process");
            return false;
        };
        let _ = entry.cause.set(TerminationCause::Stopped);

        if let Some(pid) = entry.info.pid {
            if let Err(e) = signal::signal_group(pid, Signal::Term) {
                warn!(tab_id = %tab_id, pid, error = %e, "Failed to signal process");
            }
        }
        info!(tab_id = %tab_id, "Process stopped");
        true
    }

    /// Stop the process behind `handle` and wait for it to exit.
    ///
    /// Sends SIGTERM like [`Self::stop`], then SIGKILL to the group when it
    /// is still alive after `kill_grace`. The cause stays
    /// [`TerminationCause::Stopped`]. A newer process registered under the
    /// same tab id is left alone.
    pub async fn stop_and_wait(&self, handle: &mut ProcessHandle) -> ExitOutcome {
        let tab_id = handle.tab_id().to_string();
        let pid = handle.pid();

        if let Some((_, entry)) = self
            .processes
            .remove_if(&tab_id, |_, e| e.info.pid == pid)
        {
            let _ = entry.cause.set(TerminationCause::Stopped);
        }
        if let Some(pid) = pid {
            if handle.try_outcome().is_none() {
                if let Err(e) = signal::signal_group(pid, Signal::Term) {
                    warn!(tab_id = %tab_id, pid, error = %e, "Failed to signal process");
                }
            }
        }

        match tokio::time::timeout(self.config.kill_grace, handle.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(pid) = pid {
                    warn!(tab_id = %tab_id, pid, "Process ignored SIGTERM, sending SIGKILL");
                    if let Err(e) = signal::signal_group(pid, Signal::Kill) {
                        warn!(tab_id = %tab_id, pid, error = %e, "SIGKILL failed");
                    }
                }
                handle.wait().await
            }
        }
    }

    /// Terminate `tab_id` for `reason`.
    ///
    /// Cleans up the attached container first, then sends SIGTERM and
    /// escalates to SIGKILL when the process outlives the grace period.
    pub async fn kill_process(&self, tab_id: &str, reason: &str) -> bool {
        let Some(entry) = self.processes.get(tab_id).map(|e| e.value().clone()) else {
            return false;
        };
        let _ = entry
            .cause
            .set(TerminationCause::Killed(reason.to_string()));
        self.mark(tab_id, entry.run_id, ProcessStatus::Killed);
        info!(tab_id = %tab_id, reason = %reason, "Killing process");

        if let Some(container) = &entry.info.context.container_id {
            if let Err(e) =
                container::stop_and_remove(container, self.config.container_remove_delay).await
            {
                warn!(tab_id = %tab_id, container = %container, error = %e, "Container cleanup failed");
            }
        }

        if let Some(pid) = entry.info.pid {
            if let Err(e) = signal::signal_group(pid, Signal::Term) {
                warn!(tab_id = %tab_id, pid, error = %e, "SIGTERM failed");
            }
            let mut rx = entry.exit_rx.clone();
            if tokio::time::timeout(self.config.kill_grace, wait_exit(&mut rx))
                .await
                .is_err()
            {
                warn!(tab_id = %tab_id, pid, "Process ignored SIGTERM, sending SIGKILL");
                if let Err(e) = signal::signal_group(pid, Signal::Kill) {
                    warn!(tab_id = %tab_id, pid, error = %e, "SIGKILL failed");
                }
            }
        }
        true
    }

    /// One maintenance pass: kill silent processes, drop exited entries and
    /// expire remembered outcomes.
    pub async fn sweep(&self) -> SweepReport {
        let now = now_millis();
        let threshold = i64::try_from(self.config.inactivity_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut report = SweepReport::default();
        let mut idle = Vec::new();

        for entry in self.processes.iter() {
            if entry.status != ProcessStatus::Running {
                continue;
            }
            if entry.has_exited() {
                report.zombies.push(entry.key().clone());
            } else if now - entry.last_activity.load(Ordering::Relaxed) > threshold {
                idle.push(entry.value().clone());
            }
        }

        for tab_id in &report.zombies {
            self.processes
                .remove_if(tab_id, |_, e| e.status == ProcessStatus::Running);
            info!(tab_id = %tab_id, "Removed exited process from registry");
        }

        let idle_secs = self.config.inactivity_timeout.as_secs();
        for entry in idle {
            let tab_id = entry.info.tab_id.clone();
            warn!(tab_id = %tab_id, idle_secs, "Process inactive, force-killing");
            let _ = entry.cause.set(TerminationCause::TimedOut);
            self.mark(&tab_id, entry.run_id, ProcessStatus::Failed);
            (entry.callbacks.on_error)(&format!(
                "Process terminated after {} seconds without output",
                idle_secs
            ));

            if let Some(pid) = entry.info.pid {
                if let Err(e) = signal::signal_group(pid, Signal::Kill) {
                    warn!(tab_id = %tab_id, pid, error = %e, "SIGKILL failed");
                }
            }
            if let Some(container) = &entry.info.context.container_id {
                if let Err(e) = container::stop_and_remove(container, Duration::ZERO).await {
                    warn!(tab_id = %tab_id, error = %e, "Container cleanup failed");
                }
            }
            report.timed_out.push(tab_id);
        }

        let retention = self.config.finished_retention;
        let before = self.finished.len();
        self.finished.retain(|_, f| f.finished_at.elapsed() < retention);
        report.expired = before.saturating_sub(self.finished.len());

        if !report.timed_out.is_empty() || !report.zombies.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                zombies = report.zombies.len(),
                "Process sweep finished"
            );
        }
        report
    }

    /// Run [`Self::sweep`] every `sweep_interval` until cancelled
    pub async fn run_sweeper(&self, token: CancellationToken) {
        info!(interval_secs = self.config.sweep_interval.as_secs(), "Process sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep().await;
                }
                _ = token.cancelled() => {
                    info!("Process sweeper stopped");
                    break;
                }
            }
        }
    }

    /// SIGKILL every registered process and clear the registry
    pub async fn shutdown_all(&self) -> usize {
        let tab_ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        let mut killed = 0;

        for tab_id in tab_ids {
            let Some((_, entry)) = self.processes.remove(&tab_id) else {
                continue;
            };
            let _ = entry.cause.set(TerminationCause::Shutdown);
            if let Some(pid) = entry.info.pid {
                if let Err(e) = signal::signal_group(pid, Signal::Kill) {
                    warn!(tab_id = %tab_id, pid, error = %e, "SIGKILL failed during shutdown");
                }
            }
            if let Some(container) = &entry.info.context.container_id {
                let _ = container::stop_and_remove(container, Duration::ZERO).await;
            }
            killed += 1;
        }

        if killed > 0 {
            info!(count = killed, "Killed remaining processes");
        }
        killed
    }

    fn mark(&self, tab_id: &str, run_id: Uuid, status: ProcessStatus) {
        if let Some(mut entry) = self.processes.get_mut(tab_id) {
            if entry.run_id == run_id {
                entry.status = status;
            }
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl Monitor {
    async fn run(self, mut child: Child) {
        let waited = child.wait().await;

        for mut reader in self.readers {
            // a forked grandchild can hold the pipe open past our child's exit
            if tokio::time::timeout(self.drain_timeout, &mut reader)
                .await
                .is_err()
            {
                debug!(tab_id = %self.tab_id, "Output still open after exit, detaching reader");
                reader.abort();
            }
        }

        let cause = self.cause.get().cloned();
        let outcome = match waited {
            Ok(status) => ExitOutcome::from_code(status.code(), cause),
            Err(e) => {
                warn!(tab_id = %self.tab_id, error = %e, "Failed to wait for process");
                ExitOutcome::lost(cause)
            }
        };

        let notification = match (&outcome.cause, outcome.success) {
            (Some(TerminationCause::Stopped), _) | (Some(TerminationCause::Shutdown), _) => {
                Notification::new(NotificationLevel::Info, format!("{} stopped", self.label))
            }
            (Some(cause), _) => {
                Notification::new(NotificationLevel::Error, format!("{} {}", self.label, cause))
            }
            (None, true) => Notification::new(
                NotificationLevel::Success,
                format!("{} completed successfully", self.label),
            ),
            (None, false) => Notification::new(
                NotificationLevel::Error,
                format!("{} failed: {}", self.label, outcome.describe()),
            ),
        };
        (self.callbacks.on_notification)(notification);

        self.processes
            .remove_if(&self.tab_id, |_, e| e.run_id == self.run_id);
        if !self.processes.contains_key(&self.tab_id) {
            self.finished.insert(
                self.tab_id.clone(),
                FinishedProcess {
                    outcome: outcome.clone(),
                    finished_at: Instant::now(),
                },
            );
        }

        debug!(tab_id = %self.tab_id, code = ?outcome.code, "Process exited");
        let _ = self.exit_tx.send(Some(outcome));
    }
}
