//! Web API module for Vanguard
//!
//! Provides REST API endpoints for:
//! - Health checks
//! - Process status queries
//! - Scenario and campaign control

pub mod control;
pub mod health;
pub mod processes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use serde::Serialize;

pub use control::control_routes;
pub use health::health_routes;
pub use processes::processes_routes;

/// Standard API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        }
    }
}

/// Engine error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub vanguard_core::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.code() {
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_state" => StatusCode::CONFLICT,
            "policy_violation" => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<vanguard_core::Error> for ApiError {
    fn from(e: vanguard_core::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiResponse::<()>::error(self.0.to_string(), self.0.code());
        (status, Json(body)).into_response()
    }
}

/// Result of an API handler
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new()
        .merge(health_routes())
        .merge(processes_routes())
        .merge(control_routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (vanguard_core::Error::scenario_not_found("s1"), StatusCode::NOT_FOUND),
            (
                vanguard_core::Error::InvalidState("running".into()),
                StatusCode::CONFLICT,
            ),
            (vanguard_core::Error::Policy("rm".into()), StatusCode::FORBIDDEN),
            (
                vanguard_core::Error::Store("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }

    #[test]
    fn test_error_body() {
        let body = ApiResponse::<()>::error("campaign not found: c1", "not_found");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "not_found");
        assert!(json.get("data").is_none());
    }
}
