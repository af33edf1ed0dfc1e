use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;
use uuid::Uuid;

use murmur_types::models::{Channel, Message, User};

use crate::models::{LogRow, UserRow};
use crate::{Database, Result, Store, StoreError};

impl Store for Database {
    // -- Users --

    fn save_user(&self, user: &User) -> Result<()> {
        let row = UserRow::from_user(user);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, id, email, status, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(username) DO UPDATE SET
                    id = excluded.id,
                    email = excluded.email,
                    status = excluded.status,
                    last_seen = excluded.last_seen",
                params![row.username, row.id, row.email, row.status, row.last_seen],
            )?;
            Ok(())
        })
    }

    fn load_users(&self) -> Result<Vec<User>> {
        let rows = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT username, id, email, status, last_seen FROM users")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserRow {
                        username: row.get(0)?,
                        id: row.get(1)?,
                        email: row.get(2)?,
                        status: row.get(3)?,
                        last_seen: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_user() {
                Ok(user) => users.push(user),
                Err(e) => warn!("Skipping user row: {}", e),
            }
        }
        Ok(users)
    }

    // -- Credentials --

    fn save_credentials(&self, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (email, password_hash) VALUES (?1, ?2)
                 ON CONFLICT(email) DO UPDATE SET password_hash = excluded.password_hash",
                (email, password_hash),
            )?;
            Ok(())
        })
    }

    fn get_credentials(&self, email: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let hash: Option<String> = conn
                .query_row(
                    "SELECT password_hash FROM credentials WHERE email = ?1",
                    [email],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hash)
        })
    }

    // -- Channels --

    fn save_channel(&self, channel: &Channel) -> Result<()> {
        let body = serde_json::to_string(channel)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (name, body) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET body = excluded.body",
                (&channel.name, &body),
            )?;
            Ok(())
        })
    }

    fn get_channel(&self, name: &str) -> Result<Option<Channel>> {
        let body: Option<String> = self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM channels WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(body)
        })?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        let bodies = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT body FROM channels ORDER BY rowid")?;
            let bodies = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(bodies)
        })?;

        let mut channels = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str(&body) {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!("Skipping undecodable channel record: {}", e),
            }
        }
        Ok(channels)
    }

    fn delete_channel(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM channels WHERE name = ?1", [name])?;
            Ok(n > 0)
        })
    }

    // -- Message log --

    fn append_message(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (channel, body) VALUES (?1, ?2)",
                (&message.channel, &body),
            )?;
            Ok(())
        })
    }

    fn recent_messages(&self, channel: &str, limit: u32) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, body FROM (
                    SELECT seq, body FROM messages
                    WHERE channel = ?1
                    ORDER BY seq DESC
                    LIMIT ?2
                 ) ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map(params![channel, limit], |row| {
                    Ok(LogRow {
                        seq: row.get(0)?,
                        body: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|row| decode_entry(channel, &row))
            .collect())
    }

    fn find_message(&self, channel: &str, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| Ok(scan_log(conn, channel, id)?.map(|(_, msg)| msg)))
    }

    fn update_message(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.with_conn(|conn| {
            let (seq, _) = scan_log(conn, &message.channel, message.id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", message.id)))?;
            conn.execute(
                "UPDATE messages SET body = ?1 WHERE seq = ?2",
                params![body, seq],
            )?;
            Ok(())
        })
    }

    fn toggle_reaction(
        &self,
        channel: &str,
        id: Uuid,
        emoji: &str,
        username: &str,
    ) -> Result<(bool, Message)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let (seq, mut message) = scan_log(&tx, channel, id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            let added = message.toggle_reaction(emoji, username);

            tx.execute(
                "UPDATE messages SET body = ?1 WHERE seq = ?2",
                params![serde_json::to_string(&message)?, seq],
            )?;
            tx.commit()?;

            Ok((added, message))
        })
    }
}

/// Walk a channel log in append order until an entry with `id` is found.
fn scan_log(conn: &Connection, channel: &str, id: Uuid) -> Result<Option<(i64, Message)>> {
    let mut stmt = conn.prepare("SELECT seq, body FROM messages WHERE channel = ?1 ORDER BY seq")?;
    let rows = stmt.query_map([channel], |row| {
        Ok(LogRow {
            seq: row.get(0)?,
            body: row.get(1)?,
        })
    })?;

    for row in rows {
        let row = row?;
        if let Some(message) = decode_entry(channel, &row) {
            if message.id == id {
                return Ok(Some((row.seq, message)));
            }
        }
    }

    Ok(None)
}

fn decode_entry(channel: &str, row: &LogRow) -> Option<Message> {
    match serde_json::from_str(&row.body) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Skipping undecodable log entry {} in #{}: {}", row.seq, channel, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::models::Status;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_user_upsert_and_load() {
        let db = db();
        let mut user = User::new("alice", "alice@example.com");
        db.save_user(&user).unwrap();

        user.set_status(Status::Away);
        db.save_user(&user).unwrap();

        let users = db.load_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].status, Status::Away);
        assert_eq!(users[0].id, user.id);
        assert!(users[0].is_online);
    }

    #[test]
    fn test_credentials() {
        let db = db();
        assert_eq!(db.get_credentials("a@b.io").unwrap(), None);
        db.save_credentials("a@b.io", "hash").unwrap();
        assert_eq!(db.get_credentials("a@b.io").unwrap().as_deref(), Some("hash"));
    }

    #[test]
    fn test_channel_index() {
        let db = db();
        db.save_channel(&Channel::new("general", "", "system", false)).unwrap();
        db.save_channel(&Channel::new("secret", "", "alice", true)).unwrap();

        let names: Vec<String> = db.list_channels().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["general", "secret"]);

        assert!(db.delete_channel("secret").unwrap());
        assert!(!db.delete_channel("secret").unwrap());
        assert!(db.get_channel("secret").unwrap().is_none());
    }

    #[test]
    fn test_recent_window_is_oldest_first() {
        let db = db();
        for i in 0..5 {
            db.append_message(&Message::new("alice", &format!("m{}", i), "general", false))
                .unwrap();
        }
        db.append_message(&Message::new("alice", "other", "random", false)).unwrap();

        let texts: Vec<String> = db
            .recent_messages("general", 3)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_update_message_in_place() {
        let db = db();
        let first = Message::new("alice", "one", "general", false);
        let mut second = Message::new("bob", "two", "general", false);
        db.append_message(&first).unwrap();
        db.append_message(&second).unwrap();

        second.text = "edited".into();
        db.update_message(&second).unwrap();

        let all = db.recent_messages("general", 10).unwrap();
        assert_eq!(all[0], first);
        assert_eq!(all[1].text, "edited");
    }

    #[test]
    fn test_update_missing_message_is_not_found() {
        let db = db();
        let msg = Message::new("alice", "ghost", "general", false);
        let err = db.update_message(&msg).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_toggle_reaction_persists() {
        let db = db();
        let msg = Message::new("alice", "hi", "general", false);
        db.append_message(&msg).unwrap();

        let (added, updated) = db.toggle_reaction("general", msg.id, "👍", "bob").unwrap();
        assert!(added);
        assert_eq!(updated.reactions["👍"], vec!["bob".to_string()]);

        let (added, updated) = db.toggle_reaction("general", msg.id, "👍", "bob").unwrap();
        assert!(!added);
        assert!(updated.reactions.is_empty());

        let stored = db.find_message("general", msg.id).unwrap().unwrap();
        assert!(stored.reactions.is_empty());
    }

    #[test]
    fn test_toggle_reaction_wrong_channel_is_not_found() {
        let db = db();
        let msg = Message::new("alice", "hi", "general", false);
        db.append_message(&msg).unwrap();

        let err = db.toggle_reaction("random", msg.id, "👍", "bob").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_undecodable_entries_are_skipped() {
        let db = db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (channel, body) VALUES ('general', 'DELETED')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let msg = Message::new("alice", "after", "general", false);
        db.append_message(&msg).unwrap();

        let all = db.recent_messages("general", 10).unwrap();
        assert_eq!(all, vec![msg.clone()]);
        assert!(db.find_message("general", msg.id).unwrap().is_some());
    }
}
