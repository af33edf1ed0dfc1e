use serde::{Deserialize, Serialize};

use crate::models::{Message, Status};

/// Frames exchanged over the WebSocket gateway, in both directions.
///
/// Wire shape is `{"type": "...", "payload": ...}`; unit variants omit the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    /// Server greets a freshly registered session
    Connected { message: String },

    /// A user's presence status changed
    StatusUpdate { username: String, status: Status },

    /// A message was created or its reactions changed
    ChannelMessage { channel: String, message: Message },

    /// Client liveness probe
    Ping,

    /// Server answer to `Ping`
    Pong,

    /// Client asks to receive a channel
    SubscribeChannel(String),

    /// Server confirms a `SubscribeChannel`
    Subscribed { channel: String, success: bool },

    /// Client stops receiving a channel
    UnsubscribeChannel(String),
}

impl Envelope {
    pub fn connected() -> Self {
        Self::Connected {
            message: "Connected to WebSocket".to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::StatusUpdate { .. } => "status_update",
            Self::ChannelMessage { .. } => "channel_message",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::SubscribeChannel(_) => "subscribe_channel",
            Self::Subscribed { .. } => "subscribed",
            Self::UnsubscribeChannel(_) => "unsubscribe_channel",
        }
    }
}
