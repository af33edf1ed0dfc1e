/// Database row types. These map directly to SQLite rows.
/// Distinct from murmur-types models to keep the DB layer independent.
use chrono::{DateTime, Utc};

use murmur_types::models::{Status, User};

use crate::StoreError;

pub struct UserRow {
    pub username: String,
    pub id: String,
    pub email: String,
    pub status: String,
    pub last_seen: String,
}

impl UserRow {
    pub fn from_user(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            id: user.id.to_string(),
            email: user.email.clone(),
            status: user.status.as_str().to_string(),
            last_seen: user.last_seen.to_rfc3339(),
        }
    }

    pub fn into_user(self) -> Result<User, StoreError> {
        let corrupt = |field: &str, err: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("user '{}' {}: {}", self.username, field, err))
        };

        let id = self.id.parse().map_err(|e| corrupt("id", &e))?;
        let status: Status = self.status.parse().map_err(|e| corrupt("status", &e))?;
        let last_seen = DateTime::parse_from_rfc3339(&self.last_seen)
            .map_err(|e| corrupt("last_seen", &e))?
            .with_timezone(&Utc);

        Ok(User {
            id,
            is_online: status != Status::Offline,
            username: self.username,
            email: self.email,
            status,
            last_seen,
        })
    }
}

pub struct LogRow {
    pub seq: i64,
    pub body: String,
}
