use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::{
    error::AppError, services::write_keys::IssuedWriteKey, state::AppState, types::WorkspaceId,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWriteKeyPayload {
    #[serde(default)]
    pub workspace_id: String,
}

/// Mints a write key for a workspace. The secret appears in this response
/// only.
pub async fn create_write_key(
    State(state): State<AppState>,
    Json(payload): Json<CreateWriteKeyPayload>,
) -> Result<(StatusCode, Json<IssuedWriteKey>), AppError> {
    let workspace_id = WorkspaceId::parse(payload.workspace_id.trim())?;
    let issued = state.write_keys.create(workspace_id).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}
