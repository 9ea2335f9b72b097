//! Process status API endpoints
//!
//! GET  /api/processes/:tab_id - Status of one process
//! POST /api/processes/status  - Status of several processes

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vanguard_tools::{ProcessState, ProcessSupervisor};

use super::ApiResponse;

/// Status of one external process id
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatusView {
    pub tab_id: String,
    pub status: ProcessState,
    pub running: bool,
}

/// Batch status request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    pub tab_ids: Vec<String>,
}

impl ProcessStatusView {
    fn new(tab_id: String, status: ProcessState) -> Self {
        Self {
            tab_id,
            status,
            running: status == ProcessState::Running,
        }
    }
}

async fn process_status(
    Extension(supervisor): Extension<Arc<ProcessSupervisor>>,
    Path(tab_id): Path<String>,
) -> Json<ApiResponse<ProcessStatusView>> {
    let status = supervisor.status(&tab_id);
    Json(ApiResponse::success(ProcessStatusView::new(tab_id, status)))
}

async fn batch_status(
    Extension(supervisor): Extension<Arc<ProcessSupervisor>>,
    Json(request): Json<BatchStatusRequest>,
) -> Json<ApiResponse<Vec<ProcessStatusView>>> {
    let views = supervisor
        .statuses(&request.tab_ids)
        .into_iter()
        .map(|(tab_id, status)| ProcessStatusView::new(tab_id, status))
        .collect();
    Json(ApiResponse::success(views))
}

/// Create process status routes
pub fn processes_routes() -> Router {
    Router::new()
        .route("/api/processes/status", post(batch_status))
        .route("/api/processes/:tab_id", get(process_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vanguard_tools::{ProcessCallbacks, ProcessContext, ProcessSpec, SupervisorConfig};

    fn supervisor() -> Arc<ProcessSupervisor> {
        Arc::new(ProcessSupervisor::new(
            SupervisorConfig::new().with_allowed_programs(["sleep", "true"]),
        ))
    }

    #[tokio::test]
    async fn test_unknown_process() {
        let Json(response) =
            process_status(Extension(supervisor()), Path("ghost".to_string())).await;
        let view = response.data.unwrap();
        assert_eq!(view.status, ProcessState::NotFound);
        assert!(!view.running);
    }

    #[tokio::test]
    async fn test_batch_status() {
        let supervisor = supervisor();
        supervisor
            .start(
                "long",
                ProcessSpec::new("sleep", vec!["5".to_string()]),
                ProcessCallbacks::silent(),
                ProcessContext::default(),
            )
            .await
            .unwrap();
        let mut quick = supervisor
            .start(
                "quick",
                ProcessSpec::new("true", Vec::new()),
                ProcessCallbacks::silent(),
                ProcessContext::default(),
            )
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), quick.wait())
            .await
            .unwrap();

        let Json(response) = batch_status(
            Extension(supervisor.clone()),
            Json(BatchStatusRequest {
                tab_ids: vec!["long".into(), "quick".into(), "ghost".into()],
            }),
        )
        .await;
        let views = response.data.unwrap();
        assert_eq!(views.len(), 3);
        assert!(views[0].running);
        assert_eq!(views[1].status, ProcessState::Completed);
        assert_eq!(views[2].status, ProcessState::NotFound);

        supervisor.stop("long", None).await;
    }
}
