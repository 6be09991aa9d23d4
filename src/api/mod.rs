//! API layer - HTTP handlers and routing
//!
//! Every endpoint lives under `/api`:
//! - Health check
//! - Auth (signup, login, session)
//! - Students, programs, registration wizard, registrations
//! - Waivers and announcements
//! - Email provider webhook
//! - Admin back-office

pub mod admin;
pub mod announcements;
pub mod auth;
pub mod health;
pub mod middleware;
pub mod programs;
pub mod register;
pub mod registrations;
pub mod students;
pub mod waivers;
pub mod webhooks;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser, RequestStats};

/// Build the API router (mounted under `/api`)
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need an admin by any rule)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need a session)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/students", students::router())
        .nest("/register", register::router())
        .nest("/registrations", registrations::router())
        .nest("/waivers", waivers::router())
        .nest("/announcements", announcements::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/health", health::router())
        .nest("/auth", auth::public_router())
        .nest("/programs", programs::router())
        .nest("/webhooks", webhooks::router())
        .merge(admin_routes)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    // Cookie auth needs an explicit origin with credentials
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => tracing::warn!("Ignoring invalid CORS origin '{}': {}", cors_origin, e),
    }

    Router::new()
        .nest("/api", build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}
