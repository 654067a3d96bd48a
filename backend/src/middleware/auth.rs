use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{
    error::AppError, state::AppState, types::WorkspaceId, utils::security::constant_time_eq,
};

pub const WORKSPACE_HEADER: &str = "x-workspace-id";

/// Who is calling. Inserted into request extensions by [`auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Admin,
    WorkspaceKey { workspace_id: WorkspaceId },
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    /// Workspace the credential is bound to, if any.
    pub fn workspace_id(&self) -> Option<WorkspaceId> {
        match self {
            Principal::Admin => None,
            Principal::WorkspaceKey { workspace_id } => Some(*workspace_id),
        }
    }
}

/// Accepts either the admin API key or a workspace write key as a bearer
/// credential.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer credential".to_string()))?;
    let principal = authenticate(&state, &token).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Must run after [`auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<Principal>() {
        Some(principal) if principal.is_admin() => Ok(next.run(request).await),
        Some(_) => Err(AppError::Forbidden("Admin credential required".to_string())),
        None => Err(AppError::Unauthorized("Missing bearer credential".to_string())),
    }
}

async fn authenticate(state: &AppState, token: &str) -> Result<Principal, AppError> {
    if let Some(admin_key) = state.config.admin_api_key.as_deref() {
        if constant_time_eq(token, admin_key) {
            return Ok(Principal::Admin);
        }
    }
    let workspace_id = state.write_keys.authenticate(token).await?;
    Ok(Principal::WorkspaceKey { workspace_id })
}

/// Picks the workspace for a request: the credential's own binding first,
/// then the `x-workspace-id` header, then the `workspaceId` query parameter.
/// A write key naming a different workspace elsewhere is forbidden.
pub fn resolve_workspace_id(
    principal: &Principal,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<WorkspaceId, AppError> {
    let requested = headers
        .get(WORKSPACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| query.map(str::trim).filter(|value| !value.is_empty()));

    match (principal.workspace_id(), requested) {
        (Some(bound), None) => Ok(bound),
        (Some(bound), Some(raw)) => {
            ensure_bound(principal, WorkspaceId::parse(raw)?)?;
            Ok(bound)
        }
        (None, Some(raw)) => Ok(WorkspaceId::parse(raw)?),
        (None, None) => Err(AppError::BadRequest(
            "workspaceId is required".to_string(),
        )),
    }
}

/// Rejects a write key acting on a workspace it is not bound to.
pub fn ensure_bound(principal: &Principal, workspace_id: WorkspaceId) -> Result<(), AppError> {
    match principal.workspace_id() {
        Some(bound) if bound != workspace_id => Err(AppError::Forbidden(
            "Credential is not valid for this workspace".to_string(),
        )),
        _ => Ok(()),
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer_token)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest);
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim_start());
        }
    }
    None
}
