use super::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
}

/// `GET /healthcheck`
///
/// `UP` only while every configured allocator connection is initialized.
/// Always replies 200; the verdict is in the body.
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.supervisors.iter().all(|s| s.state().is_ready()) {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    };
    Json(HealthResponse { status })
}
