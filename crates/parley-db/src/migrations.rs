use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_staff        INTEGER NOT NULL DEFAULT 0,
            is_admin        INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            body            TEXT NOT NULL,
            parent_id       TEXT REFERENCES messages(id) ON DELETE SET NULL,
            edited          INTEGER NOT NULL DEFAULT 0,
            is_read         INTEGER NOT NULL DEFAULT 0,
            sent_at         TEXT NOT NULL DEFAULT (datetime('now')),
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sent_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, is_read);

        CREATE TABLE IF NOT EXISTS message_history (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            prior_body  TEXT NOT NULL,
            edited_by   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            edited_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_history_message
            ON message_history(message_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
