use uuid::Uuid;

use duo_types::events::GatewayEvent;
use duo_types::models::{ChatSettings, Message, Room, Stroke};

use crate::capture::svg_path;

/// Latest known state of one room, rebuilt from feed snapshots.
///
/// Every snapshot replaces the matching part wholesale; nothing is patched
/// incrementally, so a missed event heals on the next one.
#[derive(Debug, Default)]
pub struct RoomView {
    room_id: Uuid,
    room: Option<Room>,
    strokes: Vec<Stroke>,
    messages: Vec<Message>,
    settings: Option<ChatSettings>,
}

impl RoomView {
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            ..Default::default()
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Applies a snapshot. Returns `false` when the event is for another
    /// room or carries no room state.
    pub fn apply(&mut self, event: GatewayEvent) -> bool {
        match event.feed() {
            Some((room_id, _)) if room_id == self.room_id => {}
            _ => return false,
        }
        match event {
            GatewayEvent::RoomSnapshot { room } => self.room = Some(room),
            GatewayEvent::StrokesSnapshot { strokes, .. } => self.strokes = strokes,
            GatewayEvent::MessagesSnapshot { messages, .. } => self.messages = messages,
            GatewayEvent::SettingsSnapshot { settings, .. } => self.settings = settings,
            GatewayEvent::Ready { .. } | GatewayEvent::SubscriptionDenied { .. } => return false,
        }
        true
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Settings as stored, falling back to the defaults field by field.
    pub fn effective_settings(&self) -> ChatSettings {
        let mut effective = ChatSettings::defaults();
        if let Some(stored) = &self.settings {
            effective.merge(stored);
        }
        effective
    }

    /// Patch that flips the room between light and dark.
    pub fn theme_toggle(&self) -> ChatSettings {
        ChatSettings {
            theme_mode: Some(self.effective_settings().theme_mode().toggled()),
            ..Default::default()
        }
    }

    /// Canvas background, if one was uploaded.
    pub fn canvas_background(&self) -> Option<&str> {
        self.room.as_ref()?.background_image_url.as_deref()
    }

    /// Paths to draw, oldest first so later strokes paint over earlier ones.
    pub fn stroke_paths(&self) -> Vec<(String, &str, f64)> {
        self.strokes
            .iter()
            .map(|s| (svg_path(&s.points), s.color.as_str(), s.width))
            .collect()
    }

    /// Whether a message was sent by `user_id`, for left/right alignment.
    pub fn is_own(message: &Message, user_id: Uuid) -> bool {
        message.sender_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use duo_types::models::{Point, ThemeMode};

    use super::*;

    fn stroke(room_id: Uuid, color: &str) -> Stroke {
        Stroke {
            id: Uuid::new_v4(),
            room_id,
            points: vec![Point::new(0.0, 0.0), Point::new(2.0, 2.0)],
            color: color.to_string(),
            width: 4.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn snapshots_replace_state() {
        let room_id = Uuid::new_v4();
        let mut view = RoomView::new(room_id);

        assert!(view.apply(GatewayEvent::StrokesSnapshot {
            room_id,
            strokes: vec![stroke(room_id, "#000000"), stroke(room_id, "#FF0000")],
        }));
        assert_eq!(view.strokes().len(), 2);

        assert!(view.apply(GatewayEvent::StrokesSnapshot {
            room_id,
            strokes: vec![stroke(room_id, "#0000FF")],
        }));
        let paths = view.stroke_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].0, "M 0 0 L 0 0 L 2 2");
        assert_eq!(paths[0].1, "#0000FF");
    }

    #[test]
    fn other_rooms_are_ignored() {
        let mut view = RoomView::new(Uuid::new_v4());
        let other = Uuid::new_v4();
        assert!(!view.apply(GatewayEvent::StrokesSnapshot {
            room_id: other,
            strokes: vec![stroke(other, "#000000")],
        }));
        assert!(!view.apply(GatewayEvent::SubscriptionDenied { room_id: other }));
        assert!(view.strokes().is_empty());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let room_id = Uuid::new_v4();
        let mut view = RoomView::new(room_id);
        assert_eq!(view.effective_settings(), ChatSettings::defaults());

        view.apply(GatewayEvent::SettingsSnapshot {
            room_id,
            settings: Some(ChatSettings {
                theme_mode: Some(ThemeMode::Light),
                ..Default::default()
            }),
        });
        let effective = view.effective_settings();
        assert_eq!(effective.theme_mode(), ThemeMode::Light);
        assert_eq!(effective.corner_radius(), ChatSettings::DEFAULT_CORNER_RADIUS);
    }

    #[test]
    fn theme_toggle_flips_effective_mode() {
        let room_id = Uuid::new_v4();
        let mut view = RoomView::new(room_id);
        let patch = view.theme_toggle();
        assert_eq!(patch.theme_mode, Some(ThemeMode::Light));
        assert!(patch.corner_radius.is_none());

        view.apply(GatewayEvent::SettingsSnapshot {
            room_id,
            settings: Some(patch),
        });
        assert_eq!(view.theme_toggle().theme_mode, Some(ThemeMode::Dark));
    }

    #[test]
    fn room_snapshot_sets_background() {
        let room_id = Uuid::new_v4();
        let mut view = RoomView::new(room_id);
        assert!(view.canvas_background().is_none());
        view.apply(GatewayEvent::RoomSnapshot {
            room: Room {
                id: room_id,
                members: vec![],
                background_image_url: Some("http://x/objects/a.jpg".into()),
                active_call_url: None,
                created_at: Utc::now(),
            },
        });
        assert_eq!(view.canvas_background(), Some("http://x/objects/a.jpg"));
    }
}
