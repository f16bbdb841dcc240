//! Bearer token authentication middleware.
//!
//! Tokens can be provided in two ways:
//! 1. **Authorization header**: `Authorization: Bearer <token>` - REST calls
//! 2. **Query parameter**: `?token=<token>` - WebSocket connections (which
//!    cannot set custom headers)
//!
//! When no token is configured on the server, all requests pass through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;

/// Extract a bearer token from the Authorization header.
fn extract_bearer_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Extract a token from the `?token=<value>` query parameter.
fn extract_query_token<B>(req: &axum::http::Request<B>) -> Option<String> {
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next()?;
            if key == "token" {
                Some(value.to_string())
            } else {
                None
            }
        })
    })
}

/// Reject requests whose token does not match the configured one.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };

    let provided = extract_bearer_token(&req)
        .map(str::to_string)
        .or_else(|| extract_query_token(&req));

    match provided {
        Some(token) if token == expected => next.run(req).await,
        _ => {
            log::warn!("rejected request with missing or invalid token");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}
