use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::Config, handlers, middleware, state::AppState};

pub fn router(state: AppState) -> Router {
    // Refresh, verify, revoke and exchange carry their own credential.
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/sessions/refresh", post(handlers::sessions::refresh_session))
        .route("/sessions/verify", post(handlers::sessions::verify_session))
        .route("/sessions/revoke", post(handlers::sessions::revoke_session))
        .route(
            "/sessions/exchange",
            post(handlers::sessions::redeem_exchange_code),
        );

    let keyed_routes = Router::new()
        .route("/sessions", post(handlers::sessions::create_session))
        .route(
            "/sessions/exchange-codes",
            post(handlers::sessions::create_exchange_code),
        )
        .route("/quota", get(handlers::quota::get_quota))
        .route("/quota/validate", post(handlers::quota::validate_quota))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    let admin_routes = Router::new()
        .route(
            "/quota",
            put(handlers::quota::upsert_quota)
                .delete(handlers::quota::delete_quota),
        )
        .route("/admin/write-keys", post(handlers::admin::create_write_key))
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(keyed_routes)
        .merge(admin_routes)
        .layer(axum_middleware::from_fn(middleware::log_error_responses))
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config)),
        )
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.cors_allow_origins;
    let allow_origin = if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(Duration::from_secs(24 * 60 * 60))
}
