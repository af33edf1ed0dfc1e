use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;

use murmur_types::api::SendMessageRequest;
use murmur_types::models::Message;

use crate::auth::{AppState, AppStateInner};
use crate::error::{ApiError, blocking};
use crate::middleware::Identity;

const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn history(
    state: &AppStateInner,
    channel: &str,
    limit: u32,
) -> Result<Vec<Message>, ApiError> {
    let store = state.store.clone();
    let channel = channel.to_string();
    let limit = limit.min(MAX_LIMIT);
    blocking(move || store.recent_messages(&channel, limit)).await
}

/// Append a message or post to a channel's log, then fan it out.
pub async fn post_message(
    state: &AppStateInner,
    author: &str,
    channel: &str,
    text: &str,
    is_post: bool,
) -> Result<Message, ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::Validation("message text is required".into()));
    }

    let message = Message::new(author, text, channel, is_post);
    let store = state.store.clone();
    let appended = message.clone();
    let exists = blocking(move || {
        if store.get_channel(&appended.channel)?.is_none() {
            return Ok(false);
        }
        store.append_message(&appended)?;
        Ok(true)
    })
    .await?;

    if !exists {
        return Err(ApiError::NotFound(format!("channel {}", channel)));
    }

    let delivered = state.hub.broadcast_to_channel(channel, &message).await;
    debug!("{} -> #{} delivered to {} sessions", author, channel, delivered);
    Ok(message)
}

// -- Handlers --

pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = history(&state, &channel, query.limit).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = post_message(&state, &identity.user.username, &channel, &req.text, false).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn send_post(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = post_message(&state, &identity.user.username, &channel, &req.text, true).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
