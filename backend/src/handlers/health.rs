use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub isolation: BTreeMap<String, bool>,
}

/// Reports `degraded` when any governed table is missing its row-level
/// policy. Probe failures count as not isolated.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let isolation: BTreeMap<String, bool> = state
        .isolation
        .isolation_status()
        .await
        .into_iter()
        .map(|(resource, enabled)| (resource.as_str().to_string(), enabled))
        .collect();
    let status = if isolation.values().all(|enabled| *enabled) {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse { status, isolation })
}
