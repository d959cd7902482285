use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatSettings, Message, Room, Stroke};

/// The independent live feeds a room exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feed {
    Room,
    Strokes,
    Messages,
    Settings,
}

impl Feed {
    pub const ALL: [Feed; 4] = [Feed::Room, Feed::Strokes, Feed::Messages, Feed::Settings];
}

/// Events sent over the WebSocket gateway.
///
/// Every room-scoped event is a full snapshot of one feed, so a subscriber
/// that missed some events converges on the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// The room document changed (members, background, call)
    RoomSnapshot { room: Room },

    /// Stroke collection, ordered by creation time ascending
    StrokesSnapshot { room_id: Uuid, strokes: Vec<Stroke> },

    /// Message collection, ordered by creation time ascending
    MessagesSnapshot { room_id: Uuid, messages: Vec<Message> },

    /// Settings document; `None` while it has never been written
    SettingsSnapshot {
        room_id: Uuid,
        settings: Option<ChatSettings>,
    },

    /// A subscribe command was refused (unknown room or not a member)
    SubscriptionDenied { room_id: Uuid },
}

impl GatewayEvent {
    /// Returns the room and feed this event belongs to.
    /// Events that return `None` are addressed to a single connection.
    pub fn feed(&self) -> Option<(Uuid, Feed)> {
        match self {
            Self::RoomSnapshot { room } => Some((room.id, Feed::Room)),
            Self::StrokesSnapshot { room_id, .. } => Some((*room_id, Feed::Strokes)),
            Self::MessagesSnapshot { room_id, .. } => Some((*room_id, Feed::Messages)),
            Self::SettingsSnapshot { room_id, .. } => Some((*room_id, Feed::Settings)),
            Self::Ready { .. } | Self::SubscriptionDenied { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving snapshots of the given feeds of a room.
    /// The current snapshot of each feed is sent immediately.
    Subscribe { room_id: Uuid, feeds: Vec<Feed> },

    /// Stop receiving anything for a room
    Unsubscribe { room_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let room_id = Uuid::new_v4();
        let event = GatewayEvent::StrokesSnapshot {
            room_id,
            strokes: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StrokesSnapshot");
        assert_eq!(json["data"]["room_id"], room_id.to_string());
        assert_eq!(event.feed(), Some((room_id, Feed::Strokes)));
    }

    #[test]
    fn subscribe_command_parses() {
        let room_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"Subscribe","data":{{"room_id":"{room_id}","feeds":["strokes","room"]}}}}"#
        );
        match serde_json::from_str::<GatewayCommand>(&raw).unwrap() {
            GatewayCommand::Subscribe { room_id: id, feeds } => {
                assert_eq!(id, room_id);
                assert_eq!(feeds, vec![Feed::Strokes, Feed::Room]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
