//! Database row types. These map directly to SQLite rows.
//! `into_*` converts them to the shared models, failing on corrupt columns.
use anyhow::{Context, Result, anyhow};
use uuid::Uuid;

use duo_types::models::{IdentityProvider, Message, Point, Room, Stroke, UploadTarget, UserProfile};

use crate::clock::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub provider: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub background_image_url: Option<String>,
    pub active_call_url: Option<String>,
    pub created_at: String,
    /// Member ids in join order.
    pub members: Vec<String>,
}

pub struct StrokeRow {
    pub id: String,
    pub room_id: String,
    /// JSON array of `{x, y}`.
    pub points: String,
    pub color: String,
    pub width: f64,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: String,
}

pub struct UploadRow {
    pub id: String,
    pub room_id: String,
    pub uploader_id: String,
    pub target: String,
    pub created_at: String,
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt {what} '{raw}'"))
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: parse_uuid(&self.id, "user id")?,
            provider: IdentityProvider::parse(&self.provider)
                .ok_or_else(|| anyhow!("corrupt provider '{}' on user {}", self.provider, self.id))?,
            display_name: self.display_name,
            email: self.email,
        })
    }
}

impl RoomRow {
    pub fn into_room(self) -> Result<Room> {
        let members = self
            .members
            .iter()
            .map(|m| parse_uuid(m, "member id"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Room {
            id: parse_uuid(&self.id, "room id")?,
            members,
            background_image_url: self.background_image_url,
            active_call_url: self.active_call_url,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on room {}", self.id))?,
        })
    }
}

impl StrokeRow {
    pub fn into_stroke(self) -> Result<Stroke> {
        let points: Vec<Point> = serde_json::from_str(&self.points)
            .with_context(|| format!("corrupt points on stroke {}", self.id))?;

        Ok(Stroke {
            id: parse_uuid(&self.id, "stroke id")?,
            room_id: parse_uuid(&self.room_id, "room id")?,
            points,
            color: self.color,
            width: self.width,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on stroke {}", self.id))?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            room_id: parse_uuid(&self.room_id, "room id")?,
            sender_id: parse_uuid(&self.sender_id, "sender id")?,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("corrupt created_at on message {}", self.id))?,
            text: self.text,
            sender_name: self.sender_name,
        })
    }
}

impl UploadRow {
    pub fn target(&self) -> Result<UploadTarget> {
        UploadTarget::parse(&self.target)
            .ok_or_else(|| anyhow!("corrupt target '{}' on upload {}", self.target, self.id))
    }
}
