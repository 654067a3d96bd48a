use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header::CONTENT_LENGTH, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::middleware::request_id::RequestId;

const MAX_BUFFERED_BODY_BYTES: usize = 64 * 1024;
const MAX_LOGGED_BODY_BYTES: usize = 2048;

struct ErrorEvent<'a> {
    status: StatusCode,
    method: &'a str,
    uri: &'a str,
    request_id: &'a str,
    latency_ms: u64,
}

/// Logs 4xx responses at `warn` and 5xx at `error`. The body is buffered so
/// the caller still receives it after the preview is taken.
pub async fn log_error_responses(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let event = ErrorEvent {
        status,
        method: &method,
        uri: &uri,
        request_id: &request_id,
        latency_ms: start.elapsed().as_millis() as u64,
    };
    let (mut parts, body) = response.into_parts();
    match to_bytes(body, MAX_BUFFERED_BODY_BYTES).await {
        Ok(bytes) => {
            event.emit(&preview(&bytes));
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            parts.headers.remove(CONTENT_LENGTH);
            event.emit(&format!("<unreadable body: {err}>"));
            Response::from_parts(parts, Body::empty())
        }
    }
}

fn preview(bytes: &Bytes) -> String {
    if bytes.len() > MAX_LOGGED_BODY_BYTES {
        format!(
            "{}... (truncated, {} bytes total)",
            String::from_utf8_lossy(&bytes.slice(0..MAX_LOGGED_BODY_BYTES)),
            bytes.len()
        )
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

impl ErrorEvent<'_> {
    fn emit(&self, body: &str) {
        let status = self.status.as_u16();
        if self.status.is_server_error() {
            tracing::error!(
                status,
                method = self.method,
                uri = self.uri,
                request_id = self.request_id,
                latency_ms = self.latency_ms,
                body,
                "Request completed with error status"
            );
        } else {
            tracing::warn!(
                status,
                method = self.method,
                uri = self.uri,
                request_id = self.request_id,
                latency_ms = self.latency_ms,
                body,
                "Request completed with error status"
            );
        }
    }
}
