//! Scenario orchestrator
//!
//! Drives a scenario's attacks either one after another (`sequence = true`)
//! or all at once. Each run owns two [`CancellationToken`]s: the loop token,
//! cancelled by stop and pause and checked between attacks, and the halt
//! token, cancelled only by stop, which aborts attacks in flight.
//!
//! Every record change goes through a per-scenario lock, is persisted and is
//! published as a scenario update on the [`EventBus`]. When a run ends the
//! orchestrator sends a [`ScenarioFinished`] signal that campaign runs await.


use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vanguard_tools::ProcessSupervisor;

use crate::error::{Error, Result};
use crate::event_bus::{EngineEvent, EventBus};
use crate::execution::{AttackExecutor, AttackOutcome};
use crate::keyed_lock::KeyedLocks;
use crate::model::{RunStatus, Scenario};
use crate::store::{require_scenario, Store};
use crate::terminal::{terminal_id, TerminalRegistry};

const FINISHED_CAPACITY: usize = 256;

/// Sent when a scenario run reaches completed, failed or stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioFinished {
    /// Scenario id
    pub scenario_id: String,
    /// Final status
    pub status: RunStatus,
}

#[derive(Clone)]
struct Run {
    id: Uuid,
    token: CancellationToken,
    halt: CancellationToken,
}

impl Run {
    fn cancel(&self) {
        self.token.cancel();
        self.halt.cancel();
    }
}

/// Starts, pauses, resumes and stops scenarios
pub struct ScenarioOrchestrator {
    store: Arc<dyn Store>,
    terminals: Arc<TerminalRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    executor: Arc<AttackExecutor>,
    events: EventBus,
    runs: DashMap<String, Run>,
    /// Serializes record updates
    locks: KeyedLocks,
    /// Held by a run loop for its whole lifetime
    loop_locks: KeyedLocks,
    finished_tx: broadcast::Sender<ScenarioFinished>,
}

impl ScenarioOrchestrator {
    /// Create an orchestrator
    pub fn new(
        store: Arc<dyn Store>,
        terminals: Arc<TerminalRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        executor: Arc<AttackExecutor>,
        events: EventBus,
    ) -> Arc<Self> {
        let (finished_tx, _) = broadcast::channel(FINISHED_CAPACITY);
        Arc::new(Self {
            store,
            terminals,
            supervisor,
            executor,
            events,
            runs: DashMap::new(),
            locks: KeyedLocks::new(),
            loop_locks: KeyedLocks::new(),
            finished_tx,
        })
    }

    /// Receive a signal whenever a scenario run ends
    pub fn subscribe_finished(&self) -> broadcast::Receiver<ScenarioFinished> {
        self.finished_tx.subscribe()
    }

    /// Current record
    pub async fn get(&self, id: &str) -> Result<Scenario> {
        require_scenario(self.store.as_ref(), id).await
    }

    /// Whether a run of `id` is executing (not stopped or paused)
    #[must_use]
    pub fn is_executing(&self, id: &str) -> bool {
        self.runs
            .get(id)
            .is_some_and(|run| !run.token.is_cancelled())
    }

    /// Start a fresh run.
    ///
    /// Clears the scenario's terminals, resets every attack to pending and
    /// returns immediately; the attacks run in a background task.
    pub async fn start(self: &Arc<Self>, id: &str) -> Result<Scenario> {
        let lock = self.locks.get(id);
        let guard = lock.lock().await;

        let mut scenario = require_scenario(self.store.as_ref(), id).await?;
        if scenario.status == RunStatus::Running {
            return Err(Error::InvalidState(format!("scenario {} is already running", id)));
        }

        if let Some((_, old)) = self.runs.remove(id) {
            old.cancel();
        }
        for (index, attack) in scenario.attacks.iter().enumerate() {
            if attack.status == RunStatus::Running {
                self.supervisor.stop(&terminal_id(id, index), None).await;
            }
        }
        self.terminals.clear_all_for_scenario(id);

        scenario.attacks.iter_mut().for_each(|a| a.reset());
        scenario.status = RunStatus::Running;
        scenario.started_at = Some(Utc::now());
        scenario.ended_at = None;
        scenario.duration_secs = None;
        self.persist(&scenario).await?;

        let run = self.begin_run(id, CancellationToken::new());
        drop(guard);

        info!(
            scenario_id = %id,
            attacks = scenario.attacks.len(),
            sequence = scenario.sequence,
            "Scenario started"
        );
        let this = Arc::clone(self);
        let id = id.to_string();
        if scenario.sequence {
            tokio::spawn(this.run_sequential(id, run));
        } else {
            tokio::spawn(this.run_parallel(id, run));
        }
        Ok(scenario)
    }

    /// Stop a running or paused scenario.
    ///
    /// Every running attack's process is stopped and the attack marked
    /// stopped. Stopping an already stopped scenario is a no-op.
    pub async fn stop(&self, id: &str) -> Result<Scenario> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut scenario = require_scenario(self.store.as_ref(), id).await?;
        match scenario.status {
            RunStatus::Stopped => {
                debug!(scenario_id = %id, "Scenario already stopped");
                return Ok(scenario);
            }
            RunStatus::Running | RunStatus::Paused => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "scenario {} is {} and cannot be stopped",
                    id, other
                )));
            }
        }

        if let Some((_, run)) = self.runs.remove(id) {
            run.cancel();
        }

        let now = Utc::now();
        for (index, attack) in scenario.attacks.iter_mut().enumerate() {
            if attack.status != RunStatus::Running {
                continue;
            }
            let tid = terminal_id(id, index);
            self.supervisor.stop(&tid, None).await;
            attack.transition(RunStatus::Stopped);
            attack.ended_at = Some(now);
            self.terminals.update_status(&tid, RunStatus::Stopped);
        }
        scenario.status = RunStatus::Stopped;
        scenario.mark_ended(now);
        self.persist(&scenario).await?;

        info!(scenario_id = %id, "Scenario stopped");
        self.notify_finished(id, RunStatus::Stopped);
        Ok(scenario)
    }

    /// Pause a running sequential scenario.
    ///
    /// The attack in flight runs to its end; no further attack starts.
    pub async fn pause(&self, id: &str) -> Result<Scenario> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut scenario = require_scenario(self.store.as_ref(), id).await?;
        if !scenario.sequence {
            return Err(Error::InvalidState(format!(
                "scenario {} runs its attacks in parallel and cannot be paused",
                id
            )));
        }
        if scenario.status != RunStatus::Running {
            return Err(Error::InvalidState(format!(
                "scenario {} is {}, only running scenarios can be paused",
                id, scenario.status
            )));
        }

        if let Some(run) = self.runs.get(id) {
            run.token.cancel();
        }
        scenario.status = RunStatus::Paused;
        self.persist(&scenario).await?;

        info!(scenario_id = %id, "Scenario paused");
        Ok(scenario)
    }

    /// Resume a paused scenario from its first unfinished attack
    pub async fn resume(self: &Arc<Self>, id: &str) -> Result<Scenario> {
        let lock = self.locks.get(id);
        let guard = lock.lock().await;

        let mut scenario = require_scenario(self.store.as_ref(), id).await?;
        if !scenario.sequence {
            return Err(Error::InvalidState(format!(
                "scenario {} runs its attacks in parallel and cannot be resumed",
                id
            )));
        }
        if scenario.status != RunStatus::Paused {
            return Err(Error::InvalidState(format!(
                "scenario {} is {}, only paused scenarios can be resumed",
                id, scenario.status
            )));
        }

        scenario.status = RunStatus::Running;
        self.persist(&scenario).await?;
        // attacks left running by the pause stay reachable by stop
        let halt = self
            .runs
            .get(id)
            .map(|run| run.halt.clone())
            .unwrap_or_default();
        let run = self.begin_run(id, halt);
        drop(guard);

        info!(scenario_id = %id, "Scenario resumed");
        tokio::spawn(Arc::clone(self).run_sequential(id.to_string(), run));
        Ok(scenario)
    }

    /// Stop the scenario if it is active, drop its terminals and delete the record
    pub async fn delete(&self, id: &str) -> Result<()> {
        let scenario = require_scenario(self.store.as_ref(), id).await?;
        if matches!(scenario.status, RunStatus::Running | RunStatus::Paused) {
            self.stop(id).await?;
        }

        let lock = self.locks.get(id);
        let _guard = lock.lock().await;
        self.terminals.clear_all_for_scenario(id);
        self.store.delete_scenario(id).await?;

        if let Some((_, run)) = self.runs.remove(id) {
            run.cancel();
        }
        self.locks.remove(id);
        self.loop_locks.remove(id);
        info!(scenario_id = %id, "Scenario deleted");
        Ok(())
    }

    fn begin_run(&self, id: &str, halt: CancellationToken) -> Run {
        let run = Run {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            halt,
        };
        self.runs.insert(id.to_string(), run.clone());
        run
    }

    async fn persist(&self, scenario: &Scenario) -> Result<()> {
        self.store.save_scenario(scenario).await?;
        self.events.publish(EngineEvent::scenario_update(scenario));
        Ok(())
    }

    fn notify_finished(&self, id: &str, status: RunStatus) {
        let _ = self.finished_tx.send(ScenarioFinished {
            scenario_id: id.to_string(),
            status,
        });
    }

    /// Lock, load, apply `f`, then persist and publish when `f` succeeds
    async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Scenario) -> Result<R>,
    ) -> Result<R> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut scenario = require_scenario(self.store.as_ref(), id).await?;
        let value = f(&mut scenario)?;
        self.persist(&scenario).await?;
        Ok(value)
    }

    async fn run_sequential(self: Arc<Self>, scenario_id: String, run: Run) {
        let loop_lock = self.loop_locks.get(&scenario_id);
        let _loop_guard = loop_lock.lock().await;

        let scenario = match self.store.load_scenario(&scenario_id).await {
            Ok(Some(scenario)) => scenario,
            Ok(None) => {
                warn!(scenario_id = %scenario_id, "Scenario disappeared before its run started");
                return;
            }
            Err(e) => {
                error!(scenario_id = %scenario_id, error = %e, "Failed to load scenario");
                return;
            }
        };

        if let Some(first) = scenario.first_unfinished() {
            for index in first..scenario.attacks.len() {
                if run.token.is_cancelled() {
                    debug!(scenario_id = %scenario_id, index, "Run cancelled before attack");
                    return;
                }
                self.run_attack(&scenario_id, index, &run.halt).await;
            }
        }

        self.finalize(&scenario_id, &run).await;
    }

    async fn run_parallel(self: Arc<Self>, scenario_id: String, run: Run) {
        let loop_lock = self.loop_locks.get(&scenario_id);
        let _loop_guard = loop_lock.lock().await;

        let scenario = match self.store.load_scenario(&scenario_id).await {
            Ok(Some(scenario)) => scenario,
            Ok(None) => {
                warn!(scenario_id = %scenario_id, "Scenario disappeared before its run started");
                return;
            }
            Err(e) => {
                error!(scenario_id = %scenario_id, error = %e, "Failed to load scenario");
                return;
            }
        };

        let pending = scenario
            .attacks
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.status.is_terminal())
            .map(|(index, _)| index);
        join_all(pending.map(|index| self.run_attack(&scenario_id, index, &run.halt))).await;

        self.finalize(&scenario_id, &run).await;
    }

    /// Run one attack; errors stop at this boundary
    async fn run_attack(&self, scenario_id: &str, index: usize, halt: &CancellationToken) {
        let prepared = self
            .update(scenario_id, |scenario| {
                if scenario.status != RunStatus::Running {
                    return Err(Error::InvalidState(format!(
                        "scenario {} is {}",
                        scenario.id, scenario.status
                    )));
                }
                let target_index = {
                    let attack = scenario
                        .attacks
                        .get_mut(index)
                        .ok_or_else(|| attack_not_found(&scenario.id, index))?;
                    if !attack.transition(RunStatus::Running) {
                        return Err(Error::InvalidState(format!(
                            "attack {} is {}",
                            attack.id, attack.status
                        )));
                    }
                    attack.started_at = Some(Utc::now());
                    attack.ended_at = None;
                    attack.target
                };
                let attack = scenario.attacks[index].clone();
                let target = scenario.targets.get(target_index.unwrap_or(0)).cloned();
                Ok((attack, target))
            })
            .await;

        let (attack, target) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(scenario_id = %scenario_id, index, error = %e, "Skipping attack");
                return;
            }
        };

        info!(scenario_id = %scenario_id, attack_id = %attack.id, tool = %attack.tool, "Attack starting");
        let outcome = self
            .executor
            .execute(scenario_id, index, &attack, target.as_ref(), halt)
            .await;
        let output = self.terminals.lines(&terminal_id(scenario_id, index));

        // A restart resets the attack and stamps a new start time; the
        // outcome of the older execution must not land on the new record.
        let mut superseded = false;
        let recorded = self
            .update(scenario_id, |scenario| {
                let current = scenario
                    .attacks
                    .get_mut(index)
                    .ok_or_else(|| attack_not_found(&scenario.id, index))?;
                if current.started_at != attack.started_at {
                    superseded = true;
                    return Err(Error::InvalidState(format!(
                        "attack {} was reset by a newer run",
                        current.id
                    )));
                }
                let attack = current;
                match &outcome {
                    AttackOutcome::Completed { process_id } => {
                        attack.process_id = Some(process_id.clone());
                        attack.transition(RunStatus::Completed);
                    }
                    AttackOutcome::Failed { process_id, .. } => {
                        attack.process_id = process_id.clone();
                        attack.transition(RunStatus::Failed);
                    }
                    AttackOutcome::Stopped { process_id } => {
                        attack.process_id = process_id.clone();
                        attack.transition(RunStatus::Stopped);
                    }
                }
                attack.set_output(output);
                if attack.ended_at.is_none() {
                    attack.ended_at = Some(Utc::now());
                }
                Ok(attack.status)
            })
            .await;

        match recorded {
            Ok(status) => {
                debug!(scenario_id = %scenario_id, index, status = %status, "Attack recorded");
            }
            Err(e) if superseded => {
                debug!(scenario_id = %scenario_id, index, error = %e, "Discarding stale attack result");
            }
            Err(e) => {
                error!(scenario_id = %scenario_id, index, error = %e, "Failed to record attack result");
            }
        }
    }

    async fn finalize(&self, scenario_id: &str, run: &Run) {
        let lock = self.locks.get(scenario_id);
        let _guard = lock.lock().await;

        let current = self
            .runs
            .get(scenario_id)
            .is_some_and(|r| r.id == run.id);
        if !current || run.token.is_cancelled() {
            debug!(scenario_id = %scenario_id, "Run superseded, not finalizing");
            return;
        }

        let mut scenario = match require_scenario(self.store.as_ref(), scenario_id).await {
            Ok(scenario) => scenario,
            Err(e) => {
                error!(scenario_id = %scenario_id, error = %e, "Failed to load scenario for finalization");
                return;
            }
        };
        if scenario.status != RunStatus::Running {
            return;
        }

        scenario.status = if scenario.all_completed() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        scenario.mark_ended(Utc::now());
        if let Err(e) = self.persist(&scenario).await {
            error!(scenario_id = %scenario_id, error = %e, "Failed to persist final status");
            return;
        }

        self.runs.remove_if(scenario_id, |_, r| r.id == run.id);
        info!(
            scenario_id = %scenario_id,
            status = %scenario.status,
            duration_secs = ?scenario.duration_secs,
            "Scenario finished"
        );
        self.notify_finished(scenario_id, scenario.status);
    }
}

fn attack_not_found(scenario_id: &str, index: usize) -> Error {
    Error::NotFound {
        kind: "attack",
        id: format!("{}#{}", scenario_id, index),
    }
}
