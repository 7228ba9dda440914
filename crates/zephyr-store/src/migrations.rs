use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            username          TEXT PRIMARY KEY,
            profile_picture   TEXT NOT NULL,
            friends           TEXT NOT NULL DEFAULT '[]',
            pending_requests  TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_key  TEXT NOT NULL,
            sender            TEXT NOT NULL,
            text              TEXT NOT NULL,
            timestamp         INTEGER NOT NULL,
            avatar_reference  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_key, timestamp);
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
