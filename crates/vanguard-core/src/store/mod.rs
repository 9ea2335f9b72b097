//! Persistence interface for scenario and campaign records
//!
//! The engine reads and writes whole records. Campaign progress counters
//! are changed only through [`Store::apply_progress`], which applies a
//! balanced delta atomically.

mod memory;
mod sqlite;


pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Campaign, ExecutionProgress, ProgressDelta, Scenario};

/// Record storage consumed by the orchestrators
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Load a scenario
    async fn load_scenario(&self, id: &str) -> Result<Option<Scenario>>;

    /// Insert or replace a scenario
    async fn save_scenario(&self, scenario: &Scenario) -> Result<()>;

    /// Delete a scenario, returning whether it existed
    async fn delete_scenario(&self, id: &str) -> Result<bool>;

    /// Load a campaign
    async fn load_campaign(&self, id: &str) -> Result<Option<Campaign>>;

    /// Insert or replace a campaign
    async fn save_campaign(&self, campaign: &Campaign) -> Result<()>;

    /// Atomically apply a progress delta and return the new counters
    async fn apply_progress(&self, campaign_id: &str, delta: ProgressDelta)
        -> Result<ExecutionProgress>;

    /// Campaigns currently in `scheduled` status
    async fn list_scheduled_campaigns(&self) -> Result<Vec<Campaign>>;
}

/// Load a scenario or fail with not-found
pub async fn require_scenario(store: &dyn Store, id: &str) -> Result<Scenario> {
    store
        .load_scenario(id)
        .await?
        .ok_or_else(|| Error::scenario_not_found(id))
}

/// Load a campaign or fail with not-found
pub async fn require_campaign(store: &dyn Store, id: &str) -> Result<Campaign> {
    store
        .load_campaign(id)
        .await?
        .ok_or_else(|| Error::campaign_not_found(id))
}
