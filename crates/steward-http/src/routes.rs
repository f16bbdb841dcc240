//! REST route handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use base64::Engine;
use serde::{Deserialize, Serialize};
use steward_core::{attachments::Attachment, Request};

use crate::AppState;

/// Wire format for one attachment; bytes travel base64-encoded.
#[derive(Deserialize)]
pub struct ApiAttachment {
    pub name: String,
    /// Base64-encoded file contents.
    pub data: String,
    #[serde(default)]
    pub mime: Option<String>,
}

/// Wire format for a normalized request.
#[derive(Deserialize)]
pub struct ApiRequest {
    pub user_id: i64,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
}

/// Wire format for the engine's response.
#[derive(Serialize)]
pub struct ApiResponse {
    pub text: String,
    pub is_error: bool,
}

/// Handler for POST /api/requests.
///
/// The engine call blocks for up to the configured execution timeout, so it
/// runs on a blocking task; concurrent requests from different users proceed
/// in parallel.
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApiRequest>,
) -> Result<Json<ApiResponse>, (StatusCode, String)> {
    let mut attachments = Vec::with_capacity(body.attachments.len());
    for attachment in body.attachments {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&attachment.data)
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("invalid base64 in attachment {}: {e}", attachment.name),
                )
            })?;
        attachments.push(Attachment {
            name: attachment.name,
            bytes,
            mime: attachment
                .mime
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        });
    }

    let request = Request {
        user_id: body.user_id,
        text: body.text,
        attachments,
    };

    let coordinator = Arc::clone(&state.coordinator);
    let response = tokio::task::spawn_blocking(move || coordinator.handle(request))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("engine task failed: {e}"),
            )
        })?;

    Ok(Json(ApiResponse {
        text: response.text,
        is_error: response.is_error,
    }))
}

/// Handler for GET /api/health.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
