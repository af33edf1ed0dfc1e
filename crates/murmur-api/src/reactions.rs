use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;
use uuid::Uuid;

use murmur_types::api::{ToggleReactionRequest, ToggleReactionResponse};

use crate::auth::{AppState, AppStateInner};
use crate::error::{ApiError, blocking};
use crate::middleware::Identity;

/// Add or remove the caller's reaction and re-broadcast the message.
pub async fn toggle(
    state: &AppStateInner,
    username: &str,
    channel: &str,
    message_id: Uuid,
    emoji: &str,
) -> Result<ToggleReactionResponse, ApiError> {
    if emoji.is_empty() {
        return Err(ApiError::Validation("emoji is required".into()));
    }

    let store = state.store.clone();
    let (channel_name, emoji_owned, user) =
        (channel.to_string(), emoji.to_string(), username.to_string());
    let (added, message) = blocking(move || {
        store.toggle_reaction(&channel_name, message_id, &emoji_owned, &user)
    })
    .await?;

    state.hub.broadcast_to_channel(channel, &message).await;
    debug!(
        "{} {} {} on {}",
        username,
        if added { "added" } else { "removed" },
        emoji,
        message_id
    );
    Ok(ToggleReactionResponse { added, message })
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((channel, message_id)): Path<(String, Uuid)>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    let response = toggle(&state, &identity.user.username, &channel, message_id, &req.emoji).await?;
    Ok(Json(response))
}
