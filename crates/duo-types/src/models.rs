use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stroke widths accepted by the canvas.
pub const MIN_STROKE_WIDTH: f64 = 1.0;
pub const MAX_STROKE_WIDTH: f64 = 20.0;
pub const DEFAULT_STROKE_WIDTH: f64 = 4.0;

/// Display name given to profiles that arrive without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One completed freehand gesture. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: Uuid,
    pub room_id: Uuid,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
    /// Assigned by the server clock, never by the client.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub text: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
}

/// Paired-user container. `id` doubles as the join code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub members: Vec<Uuid>,
    pub background_image_url: Option<String>,
    pub active_call_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    Anonymous,
    Google,
}

impl IdentityProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Google => "google",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anonymous" => Some(Self::Anonymous),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub provider: IdentityProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemeMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

/// Per-room chat settings document.
///
/// The same shape serves as the stored document and as a partial update:
/// a field left `None` in a patch is untouched by [`ChatSettings::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_mode: Option<ThemeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_url: Option<String>,
}

impl ChatSettings {
    pub const DEFAULT_TEXT_SIZE: f64 = 16.0;
    pub const DEFAULT_CORNER_RADIUS: f64 = 20.0;
    pub const DEFAULT_THEME: ThemeMode = ThemeMode::Dark;
    pub const DEFAULT_COLOR: &'static str = "#FF69B4";

    /// The document written the first time a room's settings are read.
    pub fn defaults() -> Self {
        Self {
            text_size: Some(Self::DEFAULT_TEXT_SIZE),
            corner_radius: Some(Self::DEFAULT_CORNER_RADIUS),
            theme_mode: Some(Self::DEFAULT_THEME),
            my_color: Some(Self::DEFAULT_COLOR.to_string()),
            background_url: None,
        }
    }

    pub fn corner_radius(&self) -> f64 {
        self.corner_radius.unwrap_or(Self::DEFAULT_CORNER_RADIUS)
    }

    pub fn text_size(&self) -> f64 {
        self.text_size.unwrap_or(Self::DEFAULT_TEXT_SIZE)
    }

    pub fn theme_mode(&self) -> ThemeMode {
        self.theme_mode.unwrap_or(Self::DEFAULT_THEME)
    }

    pub fn my_color(&self) -> &str {
        self.my_color.as_deref().unwrap_or(Self::DEFAULT_COLOR)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Field-level merge: every field set in `patch` overwrites, the rest stay.
    pub fn merge(&mut self, patch: &ChatSettings) {
        if patch.text_size.is_some() {
            self.text_size = patch.text_size;
        }
        if patch.corner_radius.is_some() {
            self.corner_radius = patch.corner_radius;
        }
        if patch.theme_mode.is_some() {
            self.theme_mode = patch.theme_mode;
        }
        if patch.my_color.is_some() {
            self.my_color = patch.my_color.clone();
        }
        if patch.background_url.is_some() {
            self.background_url = patch.background_url.clone();
        }
    }

    /// Checks the fields a patch may carry. Returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(r) = self.corner_radius {
            if !(0.0..=20.0).contains(&r) {
                return Err(format!("cornerRadius {r} outside 0..=20"));
            }
        }
        if let Some(size) = self.text_size {
            if !(8.0..=48.0).contains(&size) {
                return Err(format!("textSize {size} outside 8..=48"));
            }
        }
        if let Some(color) = &self.my_color {
            if !is_hex_color(color) {
                return Err(format!("myColor '{color}' is not a hex color"));
            }
        }
        Ok(())
    }
}

/// Where an uploaded background ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadTarget {
    ChatBackground,
    CanvasBackground,
}

impl UploadTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatBackground => "chatBackground",
            Self::CanvasBackground => "canvasBackground",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chatBackground" => Some(Self::ChatBackground),
            "canvasBackground" => Some(Self::CanvasBackground),
            _ => None,
        }
    }

    /// File name of the object under `rooms/{roomId}/`.
    pub fn object_name(&self) -> &'static str {
        match self {
            Self::ChatBackground => "chatBackground.jpg",
            Self::CanvasBackground => "canvasBackground.jpg",
        }
    }

    pub fn from_object_name(name: &str) -> Option<Self> {
        match name {
            "chatBackground.jpg" => Some(Self::ChatBackground),
            "canvasBackground.jpg" => Some(Self::CanvasBackground),
            _ => None,
        }
    }

    /// Object key: `rooms/{roomId}/{name}`.
    pub fn object_key(&self, room_id: Uuid) -> String {
        format!("rooms/{}/{}", room_id, self.object_name())
    }
}

/// Accepts `#RGB` and `#RRGGBB`.
pub fn is_hex_color(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_unrelated_fields() {
        let mut doc = ChatSettings::defaults();
        doc.merge(&ChatSettings {
            corner_radius: Some(10.0),
            ..Default::default()
        });
        doc.merge(&ChatSettings {
            my_color: Some("#000".into()),
            ..Default::default()
        });

        assert_eq!(doc.corner_radius, Some(10.0));
        assert_eq!(doc.my_color.as_deref(), Some("#000"));
        assert_eq!(doc.text_size, Some(16.0));
        assert_eq!(doc.theme_mode, Some(ThemeMode::Dark));
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = ChatSettings {
            theme_mode: Some(ThemeMode::Light),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "themeMode": "light" }));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let bad = ChatSettings {
            corner_radius: Some(42.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad_color = ChatSettings {
            my_color: Some("pink".into()),
            ..Default::default()
        };
        assert!(bad_color.validate().is_err());

        assert!(ChatSettings::defaults().validate().is_ok());
    }

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#000"));
        assert!(is_hex_color("#FF69b4"));
        assert!(!is_hex_color("FF69B4"));
        assert!(!is_hex_color("#12345"));
        assert!(!is_hex_color("#GGGGGG"));
    }

    #[test]
    fn object_keys() {
        let room = Uuid::nil();
        assert_eq!(
            UploadTarget::ChatBackground.object_key(room),
            "rooms/00000000-0000-0000-0000-000000000000/chatBackground.jpg"
        );
        assert_eq!(
            UploadTarget::from_object_name("canvasBackground.jpg"),
            Some(UploadTarget::CanvasBackground)
        );
    }
}
