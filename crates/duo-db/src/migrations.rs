use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            email         TEXT NOT NULL DEFAULT '',
            provider      TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id                    TEXT PRIMARY KEY,
            background_image_url  TEXT,
            active_call_url       TEXT,
            created_at            TEXT NOT NULL
        );

        -- Membership is a set: the primary key makes re-joining a no-op.
        CREATE TABLE IF NOT EXISTS room_members (
            room_id    TEXT NOT NULL REFERENCES rooms(id),
            user_id    TEXT NOT NULL REFERENCES users(id),
            joined_at  TEXT NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_room_members_user
            ON room_members(user_id);

        CREATE TABLE IF NOT EXISTS strokes (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            points      TEXT NOT NULL,
            color       TEXT NOT NULL,
            width       REAL NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_strokes_room
            ON strokes(room_id, created_at);

        CREATE TABLE IF NOT EXISTS messages (
            id           TEXT PRIMARY KEY,
            room_id      TEXT NOT NULL REFERENCES rooms(id),
            text         TEXT NOT NULL,
            sender_id    TEXT NOT NULL,
            sender_name  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        -- One JSON document per room, merged field by field on write.
        CREATE TABLE IF NOT EXISTS chat_settings (
            room_id     TEXT PRIMARY KEY REFERENCES rooms(id),
            document    TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS uploads (
            id           TEXT PRIMARY KEY,
            room_id      TEXT NOT NULL REFERENCES rooms(id),
            uploader_id  TEXT NOT NULL,
            target       TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
