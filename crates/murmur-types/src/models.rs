use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presence status of a user, independent of any live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Away,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status: {0:?}")]
pub struct InvalidStatus(pub String);

impl FromStr for Status {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "offline" => Ok(Self::Offline),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Always `status != Offline`; kept in sync by [`User::set_status`].
    #[serde(default)]
    pub is_online: bool,
    pub status: Status,
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// A freshly registered user is online.
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            is_online: true,
            status: Status::Online,
            last_seen: Utc::now(),
        }
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.is_online = status != Status::Offline;
        self.last_seen = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_private: bool,
}

impl Channel {
    pub fn new(name: &str, description: &str, created_by: &str, is_private: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            members: vec![created_by.to_string()],
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            is_private,
        }
    }

    /// Adds `username` to the member list. Returns false if already a member.
    pub fn add_member(&mut self, username: &str) -> bool {
        if self.members.iter().any(|m| m == username) {
            return false;
        }
        self.members.push(username.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub user: String,
    pub text: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    /// emoji -> usernames in reaction order. Never holds an empty list.
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub is_post: bool,
}

impl Message {
    pub fn new(user: &str, text: &str, channel: &str, is_post: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.to_string(),
            text: text.to_string(),
            channel: channel.to_string(),
            timestamp: Utc::now(),
            reactions: BTreeMap::new(),
            is_post,
        }
    }

    /// Toggle `username`'s reaction with `emoji`.
    /// Returns true if the reaction was added, false if it was removed.
    pub fn toggle_reaction(&mut self, emoji: &str, username: &str) -> bool {
        let users = self.reactions.entry(emoji.to_string()).or_default();

        if let Some(pos) = users.iter().position(|u| u == username) {
            users.remove(pos);
            if users.is_empty() {
                self.reactions.remove(emoji);
            }
            false
        } else {
            users.push(username.to_string());
            true
        }
    }
}
