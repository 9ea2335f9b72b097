use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::debug;

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Campaign, ExecutionProgress, ProgressDelta, Scenario};

/// SQLite-backed store; each record is kept as a JSON document
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    // serializes read-modify-write progress updates
    progress_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("failed to create directory: {}", e)))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self {
            pool,
            progress_lock: Mutex::new(()),
        };
        store.migrate().await?;
        debug!(path = %path.display(), "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scenarios (
                id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                record_json TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record_json FROM scenarios WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn save_scenario(&self, scenario: &Scenario) -> Result<()> {
        let json = serde_json::to_string(scenario)?;
        sqlx::query(
            r#"
            INSERT INTO scenarios (id, record_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&scenario.id)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_scenario(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scenarios WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record_json FROM campaigns WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        let json = serde_json::to_string(campaign)?;
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, status, record_json, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&campaign.id)
        .bind(campaign.status.as_str())
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_progress(
        &self,
        campaign_id: &str,
        delta: ProgressDelta,
    ) -> Result<ExecutionProgress> {
        let _guard = self.progress_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT record_json FROM campaigns WHERE id = ?")
                .bind(campaign_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (json,) = row.ok_or_else(|| Error::campaign_not_found(campaign_id))?;

        let mut campaign: Campaign = serde_json::from_str(&json)?;
        campaign.execution_progress.apply(delta)?;

        sqlx::query("UPDATE campaigns SET record_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&campaign)?)
            .bind(Utc::now())
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(campaign.execution_progress)
    }

    async fn list_scheduled_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record_json FROM campaigns WHERE status = 'scheduled' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(Error::from))
            .collect()
    }
}
