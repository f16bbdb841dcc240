//! HTTP transport for the Steward engine.
//!
//! A thin axum layer over [`steward_core::ExecutionCoordinator`]: it
//! deserializes normalized requests, runs the blocking engine call on a
//! blocking task, and returns the engine's response verbatim. No engine
//! logic lives here.
//!
//! Routes:
//! - `POST /api/requests` - submit a request, receive the terminal response
//! - `GET /api/health` - liveness probe
//! - `GET /ws/events` - WebSocket feed of execution lifecycle events

pub mod auth;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use steward_core::ExecutionCoordinator;
use tower_http::cors::CorsLayer;

/// Shared state handed to every route handler.
pub struct AppState {
    pub coordinator: Arc<ExecutionCoordinator>,
    /// Optional bearer token; `None` disables authentication.
    pub auth_token: Option<String>,
}

/// Build the router with all routes and middleware attached.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/requests", post(routes::submit_request))
        .route("/api/health", get(routes::health))
        .route("/ws/events", get(websocket::events_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
