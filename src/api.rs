//! Read-only HTTP API over the retained messages.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::error;

use crate::error::StoreError;
use crate::store::{MessageStore, StoredMessage};

/// How many messages the read endpoints return.
pub const RECENT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn MessageStore>,
}

impl ApiState {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

/// Storage failure as seen by an API caller: a 500 with no internal detail.
struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Failed to read messages: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "internal server error"})),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/messages", get(list_messages))
        .route("/messages/text", get(list_message_texts))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

/// GET /messages: the most recent messages, newest first.
async fn list_messages(
    State(state): State<ApiState>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let messages = state
        .store
        .list_recent(RECENT_LIMIT)
        .await
        .map_err(ApiError)?;
    Ok(Json(messages))
}

/// GET /messages/text: just the text of the same messages, same order.
async fn list_message_texts(State(state): State<ApiState>) -> Result<Json<Vec<String>>, ApiError> {
    let messages = state
        .store
        .list_recent(RECENT_LIMIT)
        .await
        .map_err(ApiError)?;
    Ok(Json(messages.into_iter().map(|m| m.text).collect()))
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
