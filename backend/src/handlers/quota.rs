use axum::{
    extract::{Extension, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::AppError,
    middleware::auth::{resolve_workspace_id, Principal},
    models::quota::{QuotaLimits, QuotaOverrides, QuotaOverview, QuotaUsage, ResourceType},
    state::AppState,
    types::WorkspaceId,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceQuery {
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateQuotaPayload {
    pub resource_type: String,
    pub increment: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub workspace_id: WorkspaceId,
    #[serde(flatten)]
    pub quota: QuotaLimits,
}

#[derive(Debug, Serialize)]
pub struct ValidateQuotaResponse {
    pub allowed: bool,
    #[serde(flatten)]
    pub usage: QuotaUsage,
}

pub async fn get_quota(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<QuotaOverview>, AppError> {
    let workspace_id = resolve_workspace_id(&principal, &headers, query.workspace_id.as_deref())?;
    let overview = state.quotas.overview(workspace_id).await?;
    Ok(Json(overview))
}

/// Admin only. Fields left out of the body keep their current ceiling.
pub async fn upsert_quota(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<QuotaResponse>, AppError> {
    let raw = payload
        .get("workspaceId")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation(vec!["workspaceId: required".to_string()]))?;
    let workspace_id = WorkspaceId::parse(raw.trim())?;
    let overrides = QuotaOverrides::from_json(&payload, &["workspaceId"])?;

    let quota = state.quotas.upsert_quota(workspace_id, &overrides).await?;
    tracing::info!(workspace_id = %workspace_id, "Workspace quota updated");
    Ok(Json(QuotaResponse {
        workspace_id,
        quota,
    }))
}

/// Admin only. Reverts the workspace to the default ceilings.
pub async fn delete_quota(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<Value>, AppError> {
    let workspace_id = resolve_workspace_id(&principal, &headers, query.workspace_id.as_deref())?;
    let deleted = state.quotas.delete_quota(workspace_id).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

pub async fn validate_quota(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Query(query): Query<WorkspaceQuery>,
    Json(payload): Json<ValidateQuotaPayload>,
) -> Result<Json<ValidateQuotaResponse>, AppError> {
    let workspace_id = resolve_workspace_id(&principal, &headers, query.workspace_id.as_deref())?;
    let resource: ResourceType = payload.resource_type.trim().parse()?;
    let increment = payload.increment.unwrap_or(1);

    let usage = state
        .quotas
        .validate(workspace_id, resource, increment)
        .await?
        .into_result()?;
    Ok(Json(ValidateQuotaResponse {
        allowed: true,
        usage,
    }))
}
