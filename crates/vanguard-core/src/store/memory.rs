use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Campaign, CampaignStatus, ExecutionProgress, ProgressDelta, Scenario};

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    scenarios: RwLock<HashMap<String, Scenario>>,
    campaigns: RwLock<HashMap<String, Campaign>>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        Ok(self.scenarios.read().await.get(id).cloned())
    }

    async fn save_scenario(&self, scenario: &Scenario) -> Result<()> {
        self.scenarios
            .write()
            .await
            .insert(scenario.id.clone(), scenario.clone());
        Ok(())
    }

    async fn delete_scenario(&self, id: &str) -> Result<bool> {
        Ok(self.scenarios.write().await.remove(id).is_some())
    }

    async fn load_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(id).cloned())
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.campaigns
            .write()
            .await
            .insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn apply_progress(
        &self,
        campaign_id: &str,
        delta: ProgressDelta,
    ) -> Result<ExecutionProgress> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| Error::campaign_not_found(campaign_id))?;
        campaign.execution_progress.apply(delta)?;
        Ok(campaign.execution_progress)
    }

    async fn list_scheduled_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut scheduled: Vec<Campaign> = self
            .campaigns
            .read()
            .await
            .values()
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .cloned()
            .collect();
        scheduled.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scheduled)
    }
}
