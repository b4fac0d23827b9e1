use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use super::handlers;
use super::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Largest accepted request body; signal offers are a few KiB
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/CreateStreamSession", post(handlers::create_stream_session))
        .route("/GetSignalResponse", post(handlers::get_signal_response))
        .route(
            "/ReconnectStreamSession",
            post(handlers::reconnect_stream_session),
        )
        .route("/DestroyStreamSession", post(handlers::destroy_stream_session))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let mut router = Router::new().nest("/api", api_routes);

    // Web client, when configured
    if let Some(dir) = state.config.web.static_dir.as_deref() {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
