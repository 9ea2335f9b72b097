use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by attacks, terminals and scenarios
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Not started
    #[default]
    Pending,
    /// In progress
    Running,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully; terminal
    Failed,
    /// Suspended between attacks
    Paused,
    /// Cancelled by an operator
    Stopped,
}

impl RunStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Completed, failed or stopped
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Whether `self → next` is allowed.
    ///
    /// Moving to `Failed` is always accepted; `Completed` and `Stopped` can
    /// only be overwritten by `Failed`; `Failed` is final.
    #[must_use]
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if next == Self::Failed {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Stopped)
                | (Self::Running, Self::Completed | Self::Paused | Self::Stopped)
                | (Self::Paused, Self::Running | Self::Stopped)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Being edited
    #[default]
    Draft,
    /// Waiting for its start time
    Scheduled,
    /// Executing scenarios
    Running,
    /// Suspended between scenarios
    Paused,
    /// All scenarios ran
    Completed,
    /// Execution failed
    Failed,
    /// Cancelled by an operator
    Stopped,
}

impl CampaignStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
