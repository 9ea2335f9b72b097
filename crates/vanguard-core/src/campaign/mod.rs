//! Campaign orchestrator
//!
//! Runs a campaign's scenarios strictly one after another. Each iteration
//! re-reads the campaign so pause and stop issued from elsewhere are
//! observed between scenarios. Completion of a scenario is awaited on the
//! scenario orchestrator's finished signal, with a periodic store re-read
//! as a fallback for missed signals.
//!
//! Progress counters only change through [`Store::apply_progress`], one
//! balanced delta at a time.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_bus::{EngineEvent, EventBus};
use crate::keyed_lock::KeyedLocks;
use crate::model::{Campaign, CampaignStatus, ExecutionProgress, ProgressDelta, RunStatus};
use crate::scenario::{ScenarioFinished, ScenarioOrchestrator};
use crate::store::{require_campaign, Store};

/// Campaign orchestrator configuration
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Interval of the fallback store re-read while a scenario runs
    pub completion_poll: Duration,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            completion_poll: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
struct Armed {
    id: Uuid,
    token: CancellationToken,
}

impl Armed {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }
}

/// Starts, schedules, pauses, resumes and stops campaigns
pub struct CampaignOrchestrator {
    store: Arc<dyn Store>,
    scenarios: Arc<ScenarioOrchestrator>,
    events: EventBus,
    config: CampaignConfig,
    runs: DashMap<String, Armed>,
    timers: DashMap<String, Armed>,
    locks: KeyedLocks,
    loop_locks: KeyedLocks,
}

impl CampaignOrchestrator {
    /// Create an orchestrator
    pub fn new(
        store: Arc<dyn Store>,
        scenarios: Arc<ScenarioOrchestrator>,
        events: EventBus,
        config: CampaignConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scenarios,
            events,
            config,
            runs: DashMap::new(),
            timers: DashMap::new(),
            locks: KeyedLocks::new(),
            loop_locks: KeyedLocks::new(),
        })
    }

    /// Current record
    pub async fn get(&self, id: &str) -> Result<Campaign> {
        require_campaign(self.store.as_ref(), id).await
    }

    /// Whether a start timer is armed for `id`
    #[must_use]
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    /// Start from the first scenario with fresh progress counters
    pub async fn start(self: &Arc<Self>, id: &str) -> Result<Campaign> {
        let lock = self.locks.get(id);
        let guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        if campaign.status == CampaignStatus::Running {
            return Err(Error::InvalidState(format!("campaign {} is already running", id)));
        }
        if campaign.scenario_ids.is_empty() {
            return Err(Error::InvalidState(format!("campaign {} has no scenarios", id)));
        }

        if let Some((_, timer)) = self.timers.remove(id) {
            timer.token.cancel();
        }
        campaign.execution_progress = ExecutionProgress::new(campaign.scenario_count());
        campaign.status = CampaignStatus::Running;
        campaign.started_at = Some(Utc::now());
        campaign.completed_at = None;
        self.persist(&campaign).await?;

        let run = self.begin_run(id);
        drop(guard);

        info!(campaign_id = %id, scenarios = campaign.scenario_ids.len(), "Campaign started");
        tokio::spawn(Arc::clone(self).run_loop(id.to_string(), run));
        Ok(campaign)
    }

    /// Stop a running or paused campaign and every scenario it references
    pub async fn stop(&self, id: &str) -> Result<Campaign> {
        let campaign = {
            let lock = self.locks.get(id);
            let _guard = lock.lock().await;

            let mut campaign = require_campaign(self.store.as_ref(), id).await?;
            if !matches!(
                campaign.status,
                CampaignStatus::Running | CampaignStatus::Paused
            ) {
                return Err(Error::InvalidState(format!(
                    "campaign {} is {} and cannot be stopped",
                    id, campaign.status
                )));
            }

            self.cancel_run(id);
            campaign.status = CampaignStatus::Stopped;
            campaign.completed_at = Some(Utc::now());
            self.persist(&campaign).await?;
            campaign
        };

        for scenario_id in &campaign.scenario_ids {
            match self.scenarios.stop(scenario_id).await {
                Ok(_) => {}
                Err(Error::InvalidState(reason)) => {
                    debug!(campaign_id = %id, scenario_id = %scenario_id, %reason, "Scenario not active");
                }
                Err(e) => {
                    warn!(campaign_id = %id, scenario_id = %scenario_id, error = %e, "Failed to stop scenario");
                }
            }
        }

        info!(campaign_id = %id, "Campaign stopped");
        Ok(campaign)
    }

    /// Pause a running campaign after its current scenario
    pub async fn pause(&self, id: &str) -> Result<Campaign> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        if campaign.status != CampaignStatus::Running {
            return Err(Error::InvalidState(format!(
                "campaign {} is {}, only running campaigns can be paused",
                id, campaign.status
            )));
        }

        self.cancel_run(id);
        campaign.status = CampaignStatus::Paused;
        self.persist(&campaign).await?;

        info!(campaign_id = %id, "Campaign paused");
        Ok(campaign)
    }

    /// Resume a paused campaign at the first scenario not yet finished
    pub async fn resume(self: &Arc<Self>, id: &str) -> Result<Campaign> {
        let lock = self.locks.get(id);
        let guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        if campaign.status != CampaignStatus::Paused {
            return Err(Error::InvalidState(format!(
                "campaign {} is {}, only paused campaigns can be resumed",
                id, campaign.status
            )));
        }

        campaign.status = CampaignStatus::Running;
        self.persist(&campaign).await?;
        let run = self.begin_run(id);
        drop(guard);

        info!(
            campaign_id = %id,
            from = campaign.execution_progress.finished(),
            "Campaign resumed"
        );
        tokio::spawn(Arc::clone(self).run_loop(id.to_string(), run));
        Ok(campaign)
    }

    /// Schedule a start at `at`, which must lie in the future
    pub async fn schedule(self: &Arc<Self>, id: &str, at: DateTime<Utc>) -> Result<Campaign> {
        if at <= Utc::now() {
            return Err(Error::InvalidState(format!(
                "scheduled time {} is not in the future",
                at.to_rfc3339()
            )));
        }

        let lock = self.locks.get(id);
        let guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        if campaign.status == CampaignStatus::Running {
            return Err(Error::InvalidState(format!(
                "campaign {} is running and cannot be scheduled",
                id
            )));
        }

        campaign.status = CampaignStatus::Scheduled;
        campaign.scheduled_for = Some(at);
        self.persist(&campaign).await?;
        drop(guard);

        self.arm_timer(id, at);
        info!(campaign_id = %id, scheduled_for = %at.to_rfc3339(), "Campaign scheduled");
        Ok(campaign)
    }

    /// Re-arm timers for every persisted scheduled campaign.
    ///
    /// Campaigns whose time already passed start right away.
    pub async fn restore_schedules(self: &Arc<Self>) -> Result<usize> {
        let scheduled = self.store.list_scheduled_campaigns().await?;
        for campaign in &scheduled {
            let at = campaign.scheduled_for.unwrap_or_else(Utc::now);
            self.arm_timer(&campaign.id, at);
        }
        if !scheduled.is_empty() {
            info!(count = scheduled.len(), "Restored scheduled campaigns");
        }
        Ok(scheduled.len())
    }

    /// Append scenarios not already in the campaign
    pub async fn add_scenarios(&self, id: &str, scenario_ids: &[String]) -> Result<Campaign> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        reject_running(&campaign, "add scenarios to")?;

        for scenario_id in scenario_ids {
            if !campaign.scenario_ids.contains(scenario_id) {
                campaign.scenario_ids.push(scenario_id.clone());
            }
        }
        let total = campaign.scenario_count();
        campaign.execution_progress.resize(total);
        self.persist(&campaign).await?;
        Ok(campaign)
    }

    /// Remove scenarios; progress counters restart from zero
    pub async fn remove_scenarios(&self, id: &str, scenario_ids: &[String]) -> Result<Campaign> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let mut campaign = require_campaign(self.store.as_ref(), id).await?;
        reject_running(&campaign, "remove scenarios from")?;

        campaign.scenario_ids.retain(|s| !scenario_ids.contains(s));
        campaign.execution_progress = ExecutionProgress::new(campaign.scenario_count());
        self.persist(&campaign).await?;
        Ok(campaign)
    }

    /// Cancel every run loop and timer
    pub fn cancel_all(&self) {
        for entry in self.runs.iter() {
            entry.token.cancel();
        }
        for entry in self.timers.iter() {
            entry.token.cancel();
        }
        self.runs.clear();
        self.timers.clear();
    }

    fn begin_run(&self, id: &str) -> Armed {
        let run = Armed::new();
        if let Some(old) = self.runs.insert(id.to_string(), run.clone()) {
            old.token.cancel();
        }
        run
    }

    fn cancel_run(&self, id: &str) {
        if let Some((_, run)) = self.runs.remove(id) {
            run.token.cancel();
        }
        if let Some((_, timer)) = self.timers.remove(id) {
            timer.token.cancel();
        }
    }

    async fn persist(&self, campaign: &Campaign) -> Result<()> {
        self.store.save_campaign(campaign).await?;
        self.events.publish(EngineEvent::campaign_update(campaign));
        Ok(())
    }

    async fn record_progress(&self, id: &str, delta: ProgressDelta) -> Result<ExecutionProgress> {
        let lock = self.locks.get(id);
        let _guard = lock.lock().await;

        let progress = self.store.apply_progress(id, delta).await?;
        if let Some(campaign) = self.store.load_campaign(id).await? {
            self.events.publish(EngineEvent::campaign_update(&campaign));
        }
        Ok(progress)
    }

    fn arm_timer(self: &Arc<Self>, id: &str, at: DateTime<Utc>) {
        let timer = Armed::new();
        if let Some(old) = self.timers.insert(id.to_string(), timer.clone()) {
            old.token.cancel();
        }

        let this = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = timer.token.cancelled() => {
                    debug!(campaign_id = %id, "Schedule timer cancelled");
                    return;
                }
            }
            this.timers.remove_if(&id, |_, t| t.id == timer.id);
            this.fire(&id).await;
        });
    }

    async fn fire(self: &Arc<Self>, id: &str) {
        match self.store.load_campaign(id).await {
            Ok(Some(campaign)) if campaign.status == CampaignStatus::Scheduled => {}
            Ok(Some(campaign)) => {
                debug!(campaign_id = %id, status = %campaign.status, "Campaign no longer scheduled");
                return;
            }
            Ok(None) => {
                warn!(campaign_id = %id, "Scheduled campaign disappeared");
                return;
            }
            Err(e) => {
                error!(campaign_id = %id, error = %e, "Failed to load scheduled campaign");
                return;
            }
        }

        info!(campaign_id = %id, "Scheduled start due");
        if let Err(e) = self.start(id).await {
            warn!(campaign_id = %id, error = %e, "Scheduled start failed");
        }
    }

    async fn run_loop(self: Arc<Self>, campaign_id: String, run: Armed) {
        {
            let loop_lock = self.loop_locks.get(&campaign_id);
            let _loop_guard = loop_lock.lock().await;
            self.drive(&campaign_id, &run).await;
        }
        self.release_locks(&campaign_id);
    }

    /// Forget the per-campaign locks once the run loop is gone and nobody waits on them
    fn release_locks(&self, id: &str) {
        self.locks.remove_idle(id);
        self.loop_locks.remove_idle(id);
    }

    async fn drive(&self, campaign_id: &str, run: &Armed) {
        loop {
            let launch = match self.launch_next(campaign_id, run).await {
                Ok(launch) => launch,
                Err(e) => {
                    error!(campaign_id = %campaign_id, error = %e, "Failed to launch next scenario");
                    return;
                }
            };

            let success = match launch {
                Launch::Halted | Launch::Exhausted => return,
                Launch::Refused => false,
                Launch::Started {
                    scenario_id,
                    finished,
                } => {
                    self.await_scenario(campaign_id, &scenario_id, finished)
                        .await
                }
            };

            if let Err(e) = self
                .record_progress(campaign_id, ProgressDelta::scenario_finished(success))
                .await
            {
                error!(campaign_id = %campaign_id, error = %e, "Failed to record scenario result");
                return;
            }
        }
    }

    /// Claim and start the next scenario.
    ///
    /// Runs under the campaign lock so a concurrent stop either sees the
    /// scenario running or prevents it from starting.
    async fn launch_next(&self, campaign_id: &str, run: &Armed) -> Result<Launch> {
        let lock = self.locks.get(campaign_id);
        let _guard = lock.lock().await;

        if run.token.is_cancelled() {
            debug!(campaign_id = %campaign_id, "Campaign run cancelled");
            return Ok(Launch::Halted);
        }
        let mut campaign = require_campaign(self.store.as_ref(), campaign_id).await?;
        if campaign.status != CampaignStatus::Running {
            debug!(campaign_id = %campaign_id, status = %campaign.status, "Campaign no longer running");
            return Ok(Launch::Halted);
        }

        let index = campaign.execution_progress.finished() as usize;
        let Some(scenario_id) = campaign.scenario_ids.get(index).cloned() else {
            campaign.status = CampaignStatus::Completed;
            campaign.completed_at = Some(Utc::now());
            self.persist(&campaign).await?;
            self.runs.remove_if(campaign_id, |_, r| r.id == run.id);

            let progress = campaign.execution_progress;
            info!(
                campaign_id = %campaign_id,
                completed = progress.completed,
                failed = progress.failed,
                "Campaign completed"
            );
            return Ok(Launch::Exhausted);
        };

        self.store
            .apply_progress(campaign_id, ProgressDelta::scenario_started())
            .await?;
        if let Some(campaign) = self.store.load_campaign(campaign_id).await? {
            self.events.publish(EngineEvent::campaign_update(&campaign));
        }

        // subscribe first so a fast finish is not missed
        let finished = self.scenarios.subscribe_finished();
        info!(campaign_id = %campaign_id, scenario_id = %scenario_id, index, "Campaign scenario starting");
        match self.scenarios.start(&scenario_id).await {
            Ok(_) => Ok(Launch::Started {
                scenario_id,
                finished,
            }),
            Err(e) => {
                warn!(campaign_id = %campaign_id, scenario_id = %scenario_id, error = %e, "Scenario failed to start");
                Ok(Launch::Refused)
            }
        }
    }

    /// Wait for a started scenario to end; `true` iff it completed
    async fn await_scenario(
        &self,
        campaign_id: &str,
        scenario_id: &str,
        mut finished: broadcast::Receiver<ScenarioFinished>,
    ) -> bool {
        let mut signal_open = true;
        loop {
            tokio::select! {
                received = finished.recv(), if signal_open => match received {
                    Ok(done) if done.scenario_id == scenario_id => {
                        return done.status == RunStatus::Completed;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(campaign_id = %campaign_id, skipped, "Finished signals lagged, relying on store");
                    }
                    Err(RecvError::Closed) => signal_open = false,
                },
                _ = tokio::time::sleep(self.config.completion_poll) => {
                    match self.store.load_scenario(scenario_id).await {
                        Ok(Some(scenario)) if scenario.status.is_terminal() => {
                            return scenario.status == RunStatus::Completed;
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            warn!(campaign_id = %campaign_id, scenario_id = %scenario_id, "Scenario disappeared while running");
                            return false;
                        }
                        Err(e) => {
                            warn!(campaign_id = %campaign_id, scenario_id = %scenario_id, error = %e, "Failed to poll scenario");
                        }
                    }
                }
            }
        }
    }
}

enum Launch {
    Started {
        scenario_id: String,
        finished: broadcast::Receiver<ScenarioFinished>,
    },
    Refused,
    Halted,
    Exhausted,
}

fn reject_running(campaign: &Campaign, action: &str) -> Result<()> {
    if campaign.status == CampaignStatus::Running {
        return Err(Error::InvalidState(format!(
            "cannot {} running campaign {}",
            action, campaign.id
        )));
    }
    Ok(())
}
