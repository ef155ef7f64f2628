//! HTTP routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Relay one chat turn as an event stream |
//! | `GET`  | `/health` | Health check (returns version) |

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use docchat_relay::{ChatTurnRequest, RelayStream};
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ApiError;

/// Browser request body for one chat turn.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub prompt: String,
    #[serde(default)]
    pub document_id: String,
}

/// Handler for `POST /api/chat`.
///
/// Pre-stream failures (no session, bad body, backend down before its first
/// chunk) are JSON errors with an HTTP status. Once streaming starts, failures
/// are delivered as a final `data: {"error": ...}` record.
pub async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let credential = state.sessions.credential(&headers);
    if let Err(err) = state.relay.admit(&credential) {
        warn!("rejecting chat request without a valid session");
        return Err(err.into());
    }

    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let turn = ChatTurnRequest::new(body.prompt, body.document_id, credential);
    let stream = state.relay.start(turn).await?;
    info!(turn_id = %stream.turn_id(), "streaming chat response");
    Ok(event_stream_response(stream))
}

fn event_stream_response(stream: RelayStream) -> Response {
    let events = stream.map(|event| Event::default().json_data(&event));
    ([(header::CONNECTION, "keep-alive")], Sse::new(events)).into_response()
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Handler for `GET /health`.
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
