use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use duo_types::models::{ChatSettings, IdentityProvider, Message, Room, Stroke, UploadTarget};

use crate::clock::{format_timestamp, parse_timestamp};
use crate::models::{MessageRow, RoomRow, StrokeRow, UploadRow, UserRow};
use crate::Database;

/// Result of adding a user to a room's member set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
    RoomNotFound,
}

impl Database {
    fn stamp(&self) -> String {
        format_timestamp(self.clock().now())
    }

    // -- Users --

    /// Merge-upsert: creates the profile or overwrites only the given fields.
    pub fn upsert_user(
        &self,
        id: &str,
        display_name: &str,
        email: &str,
        provider: IdentityProvider,
    ) -> Result<UserRow> {
        let now = self.stamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, email, provider, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    email = excluded.email,
                    updated_at = excluded.updated_at",
                params![id, display_name, email, provider.as_str(), now],
            )?;
            query_user(conn, id)?.context("user vanished after upsert")
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Returns false when no such user exists.
    pub fn rename_user(&self, id: &str, display_name: &str) -> Result<bool> {
        let now = self.stamp();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, display_name, now],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Rooms --

    /// Creates a room whose only member is its creator.
    pub fn create_room(&self, room_id: &str, creator_id: &str) -> Result<RoomRow> {
        let now = self.stamp();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rooms (id, created_at) VALUES (?1, ?2)",
                params![room_id, now],
            )?;
            tx.execute(
                "INSERT INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![room_id, creator_id, now],
            )?;
            tx.commit()?;
            query_room(conn, room_id)?.context("room vanished after insert")
        })
    }

    /// Idempotent set-add of `user_id` to the room's members.
    pub fn add_member(&self, room_id: &str, user_id: &str) -> Result<JoinOutcome> {
        let now = self.stamp();
        self.with_conn(|conn| {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM rooms WHERE id = ?1", [room_id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(JoinOutcome::RoomNotFound);
            }

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![room_id, user_id, now],
            )?;
            Ok(if inserted == 1 {
                JoinOutcome::Joined
            } else {
                JoinOutcome::AlreadyMember
            })
        })
    }

    /// First room (oldest, then lowest id) whose member set contains `user_id`.
    pub fn find_room_for_member(&self, user_id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let room_id: Option<String> = conn
                .query_row(
                    "SELECT r.id FROM rooms r
                     JOIN room_members m ON m.room_id = r.id
                     WHERE m.user_id = ?1
                     ORDER BY r.created_at ASC, r.id ASC
                     LIMIT 1",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;

            match room_id {
                Some(id) => query_room(conn, &id),
                None => Ok(None),
            }
        })
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, room_id))
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    [room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn list_members(&self, room_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.display_name, u.email, u.provider, u.created_at
                 FROM room_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.room_id = ?1
                 ORDER BY m.joined_at ASC",
            )?;
            let rows = stmt
                .query_map([room_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the room does not exist.
    pub fn set_room_background(&self, room_id: &str, url: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET background_image_url = ?2 WHERE id = ?1",
                params![room_id, url],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_active_call(&self, room_id: &str, url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET active_call_url = ?2 WHERE id = ?1",
                params![room_id, url],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Strokes --

    pub fn insert_stroke(
        &self,
        id: &str,
        room_id: &str,
        points_json: &str,
        color: &str,
        width: f64,
    ) -> Result<StrokeRow> {
        let now = self.stamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO strokes (id, room_id, points, color, width, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, room_id, points_json, color, width, now],
            )?;
            Ok(StrokeRow {
                id: id.to_string(),
                room_id: room_id.to_string(),
                points: points_json.to_string(),
                color: color.to_string(),
                width,
                created_at: now,
            })
        })
    }

    /// Every stroke of the room, oldest first.
    pub fn list_strokes(&self, room_id: &str) -> Result<Vec<StrokeRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, points, color, width, created_at
                 FROM strokes
                 WHERE room_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(StrokeRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        points: row.get(2)?,
                        color: row.get(3)?,
                        width: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The most recent stroke by server ordering.
    pub fn latest_stroke_id(&self, room_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM strokes
                 WHERE room_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                [room_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Returns whether a row was deleted. Deleting a missing stroke is not an error.
    pub fn delete_stroke(&self, room_id: &str, stroke_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM strokes WHERE id = ?1 AND room_id = ?2",
                [stroke_id, room_id],
            )?;
            Ok(deleted == 1)
        })
    }

    /// Atomically nulls the room background and deletes all its strokes.
    /// Returns the number of strokes removed.
    pub fn clear_canvas(&self, room_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE rooms SET background_image_url = NULL WHERE id = ?1",
                [room_id],
            )?;
            let removed = tx.execute("DELETE FROM strokes WHERE room_id = ?1", [room_id])?;
            tx.commit()?;
            Ok(removed)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        text: &str,
        sender_id: &str,
        sender_name: &str,
    ) -> Result<MessageRow> {
        let now = self.stamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, text, sender_id, sender_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, room_id, text, sender_id, sender_name, now],
            )?;
            Ok(MessageRow {
                id: id.to_string(),
                room_id: room_id.to_string(),
                text: text.to_string(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.to_string(),
                created_at: now,
            })
        })
    }

    /// Every message of the room, oldest first.
    pub fn list_messages(&self, room_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, text, sender_id, sender_name, created_at
                 FROM messages
                 WHERE room_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        text: row.get(2)?,
                        sender_id: row.get(3)?,
                        sender_name: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chat settings --

    pub fn get_chat_settings(&self, room_id: &str) -> Result<Option<ChatSettings>> {
        self.with_conn(|conn| query_settings(conn, room_id))
    }

    /// Merge-upsert of the settings document. Returns the merged document.
    pub fn merge_chat_settings(&self, room_id: &str, patch: &ChatSettings) -> Result<ChatSettings> {
        let now = self.stamp();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut document = query_settings(&tx, room_id)?.unwrap_or_default();
            document.merge(patch);
            tx.execute(
                "INSERT INTO chat_settings (room_id, document, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(room_id) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at",
                params![room_id, serde_json::to_string(&document)?, now],
            )?;
            tx.commit()?;
            Ok(document)
        })
    }

    // -- Uploads --

    pub fn create_upload(
        &self,
        id: &str,
        room_id: &str,
        uploader_id: &str,
        target: UploadTarget,
    ) -> Result<()> {
        let now = self.stamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, room_id, uploader_id, target, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, room_id, uploader_id, target.as_str(), now],
            )?;
            Ok(())
        })
    }

    pub fn get_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, room_id, uploader_id, target, created_at FROM uploads WHERE id = ?1",
                [id],
                |row| {
                    Ok(UploadRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        uploader_id: row.get(2)?,
                        target: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_upload(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM uploads WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Ids of upload sessions opened before `cutoff`.
    pub fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let cutoff = format_timestamp(cutoff);
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM uploads WHERE created_at < ?1 ORDER BY created_at")?;
            let ids = stmt
                .query_map([cutoff], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    // -- Typed documents (for REST responses and feed snapshots) --

    pub fn room_document(&self, room_id: &str) -> Result<Option<Room>> {
        self.get_room(room_id)?.map(RoomRow::into_room).transpose()
    }

    pub fn stroke_documents(&self, room_id: &str) -> Result<Vec<Stroke>> {
        self.list_strokes(room_id)?
            .into_iter()
            .map(StrokeRow::into_stroke)
            .collect()
    }

    pub fn message_documents(&self, room_id: &str) -> Result<Vec<Message>> {
        self.list_messages(room_id)?
            .into_iter()
            .map(MessageRow::into_message)
            .collect()
    }
}

/// Latest timestamp written anywhere, used to seed the clock on reopen.
pub(crate) fn latest_timestamp(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(ts) FROM (
            SELECT MAX(created_at) AS ts FROM rooms
            UNION ALL SELECT MAX(joined_at) FROM room_members
            UNION ALL SELECT MAX(created_at) FROM strokes
            UNION ALL SELECT MAX(created_at) FROM messages
            UNION ALL SELECT MAX(updated_at) FROM users
            UNION ALL SELECT MAX(updated_at) FROM chat_settings
            UNION ALL SELECT MAX(created_at) FROM uploads
        )",
        [],
        |row| row.get(0),
    )?;
    latest.as_deref().map(parse_timestamp).transpose()
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        provider: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, display_name, email, provider, created_at FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()
}

fn query_room(conn: &Connection, room_id: &str) -> Result<Option<RoomRow>> {
    let row = conn
        .query_row(
            "SELECT id, background_image_url, active_call_url, created_at FROM rooms WHERE id = ?1",
            [room_id],
            |row| {
                Ok(RoomRow {
                    id: row.get(0)?,
                    background_image_url: row.get(1)?,
                    active_call_url: row.get(2)?,
                    created_at: row.get(3)?,
                    members: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut room) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM room_members WHERE room_id = ?1 ORDER BY joined_at ASC",
    )?;
    room.members = stmt
        .query_map([room_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(Some(room))
}

fn query_settings(conn: &Connection, room_id: &str) -> Result<Option<ChatSettings>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT document FROM chat_settings WHERE room_id = ?1",
            [room_id],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|doc| {
        serde_json::from_str(&doc).with_context(|| format!("corrupt settings for room {room_id}"))
    })
    .transpose()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
