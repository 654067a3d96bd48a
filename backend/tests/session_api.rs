mod support;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;
use tenantgate_backend::{
    models::audit::AuditEventKind,
    repositories::SessionStore,
    types::{SessionId, WorkspaceId},
};

use support::{raw_post, str_field, TestApp};

#[tokio::test]
async fn create_requires_a_write_key_bound_to_the_workspace() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;

    let (status, body) = app
        .post("/sessions", None, json!({ "workspaceId": workspace_id }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .post(
            "/sessions",
            Some("not-a-key"),
            json!({ "workspaceId": workspace_id }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .post(
            "/sessions",
            Some(&key),
            json!({ "workspaceId": WorkspaceId::new() }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = app
        .post("/sessions", Some(&key), json!({ "workspaceId": "ws-123" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_IDENTIFIER");
}

#[tokio::test]
async fn fresh_session_verifies_against_its_workspace() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;

    let pair = app.create_session(workspace_id, &key).await;
    assert_eq!(pair["tokenType"], "Bearer");
    assert_eq!(pair["expiresIn"], 900);
    assert!(!str_field(&pair, "refreshToken").is_empty());

    let (status, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&pair, "accessToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["valid"], true);
    assert_eq!(outcome["workspaceId"], workspace_id.to_string());
    assert!(outcome["sessionId"].is_string());

    let events = app.backends.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditEventKind::Created);
}

#[tokio::test]
async fn verify_never_errors_on_garbage() {
    let app = TestApp::new();
    for token in ["", "garbage", "a.b.c"] {
        let (status, outcome) = app
            .post("/sessions/verify", None, json!({ "token": token }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, json!({ "valid": false }));
    }
}

#[tokio::test]
async fn verify_answers_unreadable_bodies_with_invalid() {
    let app = TestApp::new();
    let requests = [
        raw_post("/sessions/verify", None, r#"{"token":"a.b.c"}"#),
        raw_post("/sessions/verify", Some("application/json"), "not json"),
        raw_post("/sessions/verify", Some("application/json"), r#"{"token":5}"#),
    ];
    for request in requests {
        let (status, outcome) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome, json!({ "valid": false }));
    }
}

#[tokio::test]
async fn sequential_refreshes_keep_the_family() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let mut pair = app.create_session(workspace_id, &key).await;

    let (_, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&pair, "accessToken") }),
        )
        .await;
    let session_id = SessionId::parse(str_field(&outcome, "sessionId")).expect("session id");
    let family_id = app
        .backends
        .sessions
        .find_by_id(session_id)
        .await
        .expect("lookup")
        .expect("session")
        .family_id;

    for _ in 0..3 {
        app.clock.advance(Duration::minutes(1));
        let previous_refresh = str_field(&pair, "refreshToken").to_string();
        let (status, next) = app
            .post(
                "/sessions/refresh",
                None,
                json!({ "refreshToken": previous_refresh }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "refresh: {next}");
        assert_ne!(str_field(&next, "refreshToken"), previous_refresh);
        pair = next;
    }

    let session = app
        .backends
        .sessions
        .find_by_id(session_id)
        .await
        .expect("lookup")
        .expect("session");
    assert_eq!(session.family_id, family_id);
    assert_eq!(session.refresh_count, 3);
    assert!(session.revoked_at.is_none());

    let refreshed = app
        .backends
        .audit
        .events()
        .into_iter()
        .filter(|event| event.kind == AuditEventKind::Refreshed)
        .count();
    assert_eq!(refreshed, 3);
}

#[tokio::test]
async fn replaced_access_credential_survives_only_the_grace_window() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let first = app.create_session(workspace_id, &key).await;

    app.clock.advance(Duration::seconds(5));
    let (status, second) = app
        .post(
            "/sessions/refresh",
            None,
            json!({ "refreshToken": str_field(&first, "refreshToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let old_access = json!({ "token": str_field(&first, "accessToken") });
    let new_access = json!({ "token": str_field(&second, "accessToken") });

    let (_, outcome) = app.post("/sessions/verify", None, old_access.clone()).await;
    assert_eq!(outcome["valid"], true);

    app.clock.advance(Duration::seconds(31));
    let (_, outcome) = app.post("/sessions/verify", None, old_access).await;
    assert_eq!(outcome["valid"], false);
    let (_, outcome) = app.post("/sessions/verify", None, new_access).await;
    assert_eq!(outcome["valid"], true);
}

#[tokio::test]
async fn access_credential_expires_with_its_ttl() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let pair = app.create_session(workspace_id, &key).await;

    app.clock.advance(Duration::minutes(15));
    let (status, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&pair, "accessToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["valid"], false);
}

#[tokio::test]
async fn reusing_a_rotated_refresh_credential_revokes_the_family() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let first = app.create_session(workspace_id, &key).await;
    let stolen = str_field(&first, "refreshToken").to_string();

    let (status, second) = app
        .post("/sessions/refresh", None, json!({ "refreshToken": stolen }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/sessions/refresh", None, json!({ "refreshToken": stolen }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_REFRESH_CREDENTIAL");

    // The legitimate holder is logged out too.
    let (status, body) = app
        .post(
            "/sessions/refresh",
            None,
            json!({ "refreshToken": str_field(&second, "refreshToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_REFRESH_CREDENTIAL");

    let (_, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&second, "accessToken") }),
        )
        .await;
    assert_eq!(outcome["valid"], false);

    let events = app.backends.audit.events();
    let reuse = events
        .iter()
        .filter(|event| event.kind == AuditEventKind::ReuseDetected)
        .collect::<Vec<_>>();
    assert!(!reuse.is_empty());
    assert!(reuse.iter().all(|event| !event.success));
    assert!(events
        .iter()
        .any(|event| event.kind == AuditEventKind::Revoked));
}

#[tokio::test]
async fn refresh_failures_share_one_message() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let pair = app.create_session(workspace_id, &key).await;

    let (status, unknown) = app
        .post(
            "/sessions/refresh",
            None,
            json!({ "refreshToken": "never-issued" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.clock.advance(Duration::days(8));
    let (status, expired) = app
        .post(
            "/sessions/refresh",
            None,
            json!({ "refreshToken": str_field(&pair, "refreshToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, expired);
    assert_eq!(expired["code"], "INVALID_REFRESH_CREDENTIAL");

    let (status, _) = app
        .post("/sessions/refresh", None, json!({ "refreshToken": "" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, mistyped) = app
        .post("/sessions/refresh", None, json!({ "refreshToken": 123 }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(mistyped, unknown);

    let (status, garbled) = app
        .send(raw_post(
            "/sessions/refresh",
            Some("application/json"),
            "refreshToken=abc",
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbled, unknown);
}

#[tokio::test]
async fn revoke_is_idempotent_and_audited_once() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let pair = app.create_session(workspace_id, &key).await;
    let (_, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&pair, "accessToken") }),
        )
        .await;
    let session_id = str_field(&outcome, "sessionId").to_string();

    for _ in 0..2 {
        let (status, body) = app
            .post(
                "/sessions/revoke",
                None,
                json!({ "sessionId": session_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
    }

    let revoked = app
        .backends
        .audit
        .events()
        .into_iter()
        .filter(|event| event.kind == AuditEventKind::Revoked)
        .count();
    assert_eq!(revoked, 1);

    let (_, outcome) = app
        .post(
            "/sessions/verify",
            None,
            json!({ "token": str_field(&pair, "accessToken") }),
        )
        .await;
    assert_eq!(outcome["valid"], false);
}

#[tokio::test]
async fn revoke_by_refresh_credential_and_unknown_targets() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let pair = app.create_session(workspace_id, &key).await;

    let (status, _) = app
        .post(
            "/sessions/revoke",
            None,
            json!({ "refreshToken": str_field(&pair, "refreshToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/sessions/revoke",
            None,
            json!({ "sessionId": SessionId::new() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    for body in [json!({}), json!({ "sessionId": "nope" }), json!({ "sessionId": 7 })] {
        let (status, body) = app.post("/sessions/revoke", None, body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn sweep_marks_stale_sessions_expired() {
    let app = TestApp::new();
    let (workspace_id, key) = app.workspace_with_key().await;
    let pair = app.create_session(workspace_id, &key).await;

    app.clock.advance(Duration::days(8));
    let report = app.state.sessions.sweep_expired().await.expect("sweep");
    assert_eq!(report.expired_sessions, 1);

    let again = app.state.sessions.sweep_expired().await.expect("sweep");
    assert_eq!(again.expired_sessions, 0);
    assert!(app
        .backends
        .audit
        .events()
        .iter()
        .any(|event| event.kind == AuditEventKind::Expired));

    // An expired credential is not treated as theft.
    let (status, _) = app
        .post(
            "/sessions/refresh",
            None,
            json!({ "refreshToken": str_field(&pair, "refreshToken") }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!app
        .backends
        .audit
        .events()
        .iter()
        .any(|event| event.kind == AuditEventKind::ReuseDetected));
}
