//! Scenario and campaign control endpoints
//!
//! GET    /api/scenarios/:id                 - Scenario record
//! POST   /api/scenarios/:id/{start,stop,pause,resume}
//! DELETE /api/scenarios/:id                 - Stop if running, then delete
//! GET    /api/campaigns/:id                 - Campaign record
//! POST   /api/campaigns/:id/{start,stop,pause,resume}
//! POST   /api/campaigns/:id/schedule        - Schedule a start
//! POST   /api/campaigns/:id/scenarios       - Add scenarios
//! DELETE /api/campaigns/:id/scenarios       - Remove scenarios

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use vanguard_core::{Campaign, CampaignOrchestrator, Scenario, ScenarioOrchestrator};

use super::{ApiResponse, ApiResult};

/// Request to schedule a campaign
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub scheduled_for: DateTime<Utc>,
}

/// Scenario ids to add to or remove from a campaign
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioIdsRequest {
    pub scenario_ids: Vec<String>,
}

type Scenarios = Extension<Arc<ScenarioOrchestrator>>;
type Campaigns = Extension<Arc<CampaignOrchestrator>>;

async fn get_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<Scenario> {
    Ok(Json(ApiResponse::success(s.get(&id).await?)))
}

async fn start_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<Scenario> {
    Ok(Json(ApiResponse::success(s.start(&id).await?)))
}

async fn stop_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<Scenario> {
    Ok(Json(ApiResponse::success(s.stop(&id).await?)))
}

async fn pause_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<Scenario> {
    Ok(Json(ApiResponse::success(s.pause(&id).await?)))
}

async fn resume_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<Scenario> {
    Ok(Json(ApiResponse::success(s.resume(&id).await?)))
}

async fn delete_scenario(Extension(s): Scenarios, Path(id): Path<String>) -> ApiResult<String> {
    s.delete(&id).await?;
    info!(scenario_id = %id, "Scenario deleted via API");
    Ok(Json(ApiResponse::success(id)))
}

async fn get_campaign(Extension(c): Campaigns, Path(id): Path<String>) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(c.get(&id).await?)))
}

async fn start_campaign(Extension(c): Campaigns, Path(id): Path<String>) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(c.start(&id).await?)))
}

async fn stop_campaign(Extension(c): Campaigns, Path(id): Path<String>) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(c.stop(&id).await?)))
}

async fn pause_campaign(Extension(c): Campaigns, Path(id): Path<String>) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(c.pause(&id).await?)))
}

async fn resume_campaign(Extension(c): Campaigns, Path(id): Path<String>) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(c.resume(&id).await?)))
}

async fn schedule_campaign(
    Extension(c): Campaigns,
    Path(id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(
        c.schedule(&id, request.scheduled_for).await?,
    )))
}

async fn add_scenarios(
    Extension(c): Campaigns,
    Path(id): Path<String>,
    Json(request): Json<ScenarioIdsRequest>,
) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(
        c.add_scenarios(&id, &request.scenario_ids).await?,
    )))
}

async fn remove_scenarios(
    Extension(c): Campaigns,
    Path(id): Path<String>,
    Json(request): Json<ScenarioIdsRequest>,
) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::success(
        c.remove_scenarios(&id, &request.scenario_ids).await?,
    )))
}

/// Create control routes
pub fn control_routes() -> Router {
    Router::new()
        .route("/api/scenarios/:id", get(get_scenario).delete(delete_scenario))
        .route("/api/scenarios/:id/start", post(start_scenario))
        .route("/api/scenarios/:id/stop", post(stop_scenario))
        .route("/api/scenarios/:id/pause", post(pause_scenario))
        .route("/api/scenarios/:id/resume", post(resume_scenario))
        .route("/api/campaigns/:id", get(get_campaign))
        .route("/api/campaigns/:id/start", post(start_campaign))
        .route("/api/campaigns/:id/stop", post(stop_campaign))
        .route("/api/campaigns/:id/pause", post(pause_campaign))
        .route("/api/campaigns/:id/resume", post(resume_campaign))
        .route("/api/campaigns/:id/schedule", post(schedule_campaign))
        .route(
            "/api/campaigns/:id/scenarios",
            post(add_scenarios).delete(remove_scenarios),
        )
}
