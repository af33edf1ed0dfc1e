use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            username    TEXT PRIMARY KEY,
            id          TEXT NOT NULL,
            email       TEXT NOT NULL,
            status      TEXT NOT NULL,
            last_seen   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credentials (
            email           TEXT PRIMARY KEY,
            password_hash   TEXT NOT NULL
        );

        -- Channel records are stored whole; the name is the index key
        CREATE TABLE IF NOT EXISTS channels (
            name        TEXT PRIMARY KEY,
            body        TEXT NOT NULL
        );

        -- One append-only log per channel, ordered by seq
        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            channel     TEXT NOT NULL,
            body        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
