pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use murmur_types::models::{Channel, Message, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent store consumed by the presence directory, the gateway and the API.
///
/// Channel logs behave like append-only lists: `append_message` assigns the next
/// position, and `update_message` / `toggle_reaction` walk the log in order until
/// the message id matches.
pub trait Store: Send + Sync {
    // -- Users --
    fn save_user(&self, user: &User) -> Result<()>;
    fn load_users(&self) -> Result<Vec<User>>;

    // -- Credentials --
    fn save_credentials(&self, email: &str, password_hash: &str) -> Result<()>;
    fn get_credentials(&self, email: &str) -> Result<Option<String>>;

    // -- Channels --
    fn save_channel(&self, channel: &Channel) -> Result<()>;
    fn get_channel(&self, name: &str) -> Result<Option<Channel>>;
    fn list_channels(&self) -> Result<Vec<Channel>>;
    /// Returns false if no channel had that name.
    fn delete_channel(&self, name: &str) -> Result<bool>;

    // -- Message log --
    fn append_message(&self, message: &Message) -> Result<()>;
    /// The last `limit` messages of a channel, oldest first.
    fn recent_messages(&self, channel: &str, limit: u32) -> Result<Vec<Message>>;
    fn find_message(&self, channel: &str, id: Uuid) -> Result<Option<Message>>;
    /// Replace the message with the same id in place. `NotFound` if absent.
    fn update_message(&self, message: &Message) -> Result<()>;
    /// Atomically toggle a reaction. Returns (added, updated message).
    fn toggle_reaction(
        &self,
        channel: &str,
        id: Uuid,
        emoji: &str,
        username: &str,
    ) -> Result<(bool, Message)>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }
}
