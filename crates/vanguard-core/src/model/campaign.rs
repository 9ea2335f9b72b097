use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CampaignStatus;
use crate::error::{Error, Result};

/// Per-campaign scenario counters; the four buckets always sum to `total`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Number of scenarios in the campaign
    pub total: u32,
    /// Not started
    pub pending: u32,
    /// In flight
    pub running: u32,
    /// Finished successfully
    pub completed: u32,
    /// Finished unsuccessfully
    pub failed: u32,
}

impl ExecutionProgress {
    /// Everything pending
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            total,
            pending: total,
            ..Default::default()
        }
    }

    /// Whether the buckets sum to `total`
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.pending + self.running + self.completed + self.failed == self.total
    }

    /// Scenarios that already finished, in either direction
    #[must_use]
    pub fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    /// Change `total`, moving the difference in or out of `pending`
    pub fn resize(&mut self, total: u32) {
        let busy = self.running + self.completed + self.failed;
        self.total = total.max(busy);
        self.pending = self.total - busy;
    }

    /// Apply a balanced delta, rejecting underflow
    pub fn apply(&mut self, delta: ProgressDelta) -> Result<()> {
        if !delta.is_balanced() {
            return Err(Error::InvalidState(format!(
                "unbalanced progress delta {:?}",
                delta
            )));
        }
        let shift = |value: u32, by: i32| -> Result<u32> {
            value.checked_add_signed(by).ok_or_else(|| {
                Error::InvalidState(format!("progress counter underflow applying {:?}", delta))
            })
        };
        let next = Self {
            total: self.total,
            pending: shift(self.pending, delta.pending)?,
            running: shift(self.running, delta.running)?,
            completed: shift(self.completed, delta.completed)?,
            failed: shift(self.failed, delta.failed)?,
        };
        *self = next;
        Ok(())
    }
}

/// Atomic change to the progress counters; must net to zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDelta {
    /// Change to `pending`
    pub pending: i32,
    /// Change to `running`
    pub running: i32,
    /// Change to `completed`
    pub completed: i32,
    /// Change to `failed`
    pub failed: i32,
}

impl ProgressDelta {
    /// pending → running
    #[must_use]
    pub fn scenario_started() -> Self {
        Self {
            pending: -1,
            running: 1,
            ..Default::default()
        }
    }

    /// running → completed or failed
    #[must_use]
    pub fn scenario_finished(success: bool) -> Self {
        Self {
            running: -1,
            completed: i32::from(success),
            failed: i32::from(!success),
            ..Default::default()
        }
    }

    /// Whether the counters net to zero
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.pending + self.running + self.completed + self.failed == 0
    }
}

/// Ordered group of scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    /// Campaign id
    pub id: String,
    /// Display name
    pub name: String,
    /// Scenarios in execution order
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: CampaignStatus,
    /// Start time for a scheduled campaign
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Scenario counters
    #[serde(default)]
    pub execution_progress: ExecutionProgress,
    /// Start of the current run
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// End of the last run
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Draft campaign over `scenario_ids`
    pub fn new(id: impl Into<String>, name: impl Into<String>, scenario_ids: Vec<String>) -> Self {
        let total = u32::try_from(scenario_ids.len()).unwrap_or(u32::MAX);
        Self {
            id: id.into(),
            name: name.into(),
            scenario_ids,
            status: CampaignStatus::Draft,
            scheduled_for: None,
            execution_progress: ExecutionProgress::new(total),
            started_at: None,
            completed_at: None,
        }
    }

    /// Number of scenarios as a counter value
    #[must_use]
    pub fn scenario_count(&self) -> u32 {
        u32::try_from(self.scenario_ids.len()).unwrap_or(u32::MAX)
    }
}
