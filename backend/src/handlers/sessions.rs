use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::{ensure_bound, Principal},
    models::session::{ClientMetadata, RevocationReason},
    services::session::{RevokeTarget, TokenPair, VerifyOutcome},
    state::AppState,
    types::{SessionId, WorkspaceId},
};

const MAX_FINGERPRINT_LENGTH: u64 = 256;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    pub workspace_id: Option<String>,
    #[validate(length(max = MAX_FINGERPRINT_LENGTH))]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub refresh_token: String,
    #[validate(length(max = MAX_FINGERPRINT_LENGTH))]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPayload {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokePayload {
    pub session_id: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExchangePayload {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeCodeResponse {
    pub code: String,
    pub expires_in: u64,
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<(StatusCode, Json<TokenPair>), AppError> {
    payload.validate()?;
    let workspace_id = session_workspace(&principal, payload.workspace_id.as_deref())?;
    let client = client_metadata(&headers, payload.fingerprint);

    let issued = state.sessions.create(workspace_id, client).await?;
    Ok((StatusCode::CREATED, Json(issued.tokens)))
}

pub async fn refresh_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RefreshPayload>, JsonRejection>,
) -> Result<Json<TokenPair>, AppError> {
    // Malformed bodies get the same answer as an unknown credential.
    let Ok(Json(payload)) = payload else {
        return Err(AppError::InvalidRefreshCredential);
    };
    if payload.validate().is_err() {
        return Err(AppError::InvalidRefreshCredential);
    }
    let client = client_metadata(&headers, payload.fingerprint);
    let issued = state
        .sessions
        .refresh(payload.refresh_token.trim(), client)
        .await?;
    Ok(Json(issued.tokens))
}

/// Always answers 200; anything unreadable is simply not a valid credential.
pub async fn verify_session(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPayload>, JsonRejection>,
) -> Json<VerifyOutcome> {
    let Ok(Json(payload)) = payload else {
        return Json(VerifyOutcome::invalid());
    };
    let token = payload.token.trim();
    if token.is_empty() {
        return Json(VerifyOutcome::invalid());
    }
    Json(state.sessions.verify(token).await)
}

pub async fn revoke_session(
    State(state): State<AppState>,
    payload: Result<Json<RevokePayload>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Ok(Json(payload)) = payload else {
        return Err(session_not_found());
    };
    let session_id = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());
    let refresh_token = payload
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());

    let target = match (session_id, refresh_token) {
        (Some(raw), _) => {
            RevokeTarget::Session(SessionId::parse(raw).map_err(|_| session_not_found())?)
        }
        (None, Some(token)) => RevokeTarget::RefreshToken(token.to_string()),
        (None, None) => return Err(session_not_found()),
    };

    state
        .sessions
        .revoke(target, RevocationReason::Manual)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Creates a session and parks its token pair behind a one-time code.
pub async fn create_exchange_code(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<(StatusCode, Json<ExchangeCodeResponse>), AppError> {
    payload.validate()?;
    let workspace_id = session_workspace(&principal, payload.workspace_id.as_deref())?;
    let client = client_metadata(&headers, payload.fingerprint);

    let issued = state.sessions.create(workspace_id, client).await?;
    let code = state.exchange_codes.issue(issued.tokens).await?;
    Ok((
        StatusCode::CREATED,
        Json(ExchangeCodeResponse {
            code,
            expires_in: state.exchange_codes.ttl().as_secs(),
        }),
    ))
}

pub async fn redeem_exchange_code(
    State(state): State<AppState>,
    payload: Result<Json<ExchangePayload>, JsonRejection>,
) -> Result<Json<TokenPair>, AppError> {
    let Some(Json(payload)) = payload.ok().filter(|Json(payload)| payload.validate().is_ok())
    else {
        return Err(AppError::Unauthorized(
            "Exchange code is invalid or expired".to_string(),
        ));
    };
    let tokens = state.exchange_codes.redeem(payload.code.trim()).await?;
    Ok(Json(tokens))
}

/// Matches the unknown-target answer from `SessionService::revoke`.
fn session_not_found() -> AppError {
    AppError::Unauthorized("Session not found".to_string())
}

fn session_workspace(principal: &Principal, raw: Option<&str>) -> Result<WorkspaceId, AppError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => {
            let workspace_id = WorkspaceId::parse(raw)?;
            ensure_bound(principal, workspace_id)?;
            Ok(workspace_id)
        }
        None => principal
            .workspace_id()
            .ok_or_else(|| AppError::Validation(vec!["workspaceId: required".to_string()])),
    }
}

fn client_metadata(headers: &HeaderMap, fingerprint: Option<String>) -> ClientMetadata {
    ClientMetadata {
        ip: extract_ip(headers),
        user_agent: extract_user_agent(headers),
        fingerprint: fingerprint
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
    }
}

fn extract_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return value
            .split(',')
            .next()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|agent| agent.trim().to_string())
        .filter(|agent| !agent.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn first_forwarded_address_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert(USER_AGENT, HeaderValue::from_static(" widget/1.0 "));

        let client = client_metadata(&headers, Some("  ".to_string()));
        assert_eq!(client.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("widget/1.0"));
        assert_eq!(client.fingerprint, None);
    }

    #[test]
    fn write_key_supplies_workspace_when_body_omits_it() {
        let workspace_id = WorkspaceId::new();
        let principal = Principal::WorkspaceKey { workspace_id };
        assert_eq!(
            session_workspace(&principal, None).expect("workspace"),
            workspace_id
        );

        let err = session_workspace(&Principal::Admin, None).expect_err("admin needs body");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
