use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, warn};
use uuid::Uuid;

use duo_db::Database;
use duo_types::events::{Feed, GatewayEvent};

/// A full snapshot of one feed of one room, serialized once for every
/// WebSocket subscriber.
#[derive(Debug)]
pub struct Snapshot {
    pub room_id: Uuid,
    pub feed: Feed,
    pub event: GatewayEvent,
    pub json: String,
}

impl Snapshot {
    fn new(room_id: Uuid, feed: Feed, event: GatewayEvent) -> anyhow::Result<Self> {
        let json = serde_json::to_string(&event)?;
        Ok(Self {
            room_id,
            feed,
            event,
            json,
        })
    }
}

/// Fans fresh snapshots out to every subscriber of a room feed.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,

    /// Every subscriber sees every snapshot and filters by (room, feed)
    broadcast_tx: broadcast::Sender<Arc<Snapshot>>,

    /// Held while a snapshot is read and sent, and while a subscription
    /// takes its initial snapshots. Keeps delivery in read order.
    publish_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                broadcast_tx,
                publish_lock: Mutex::new(()),
            }),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Number of live subscription handles (WebSocket or in-process).
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    /// Read the current state of a feed and push it to its subscribers.
    /// Failures are logged; subscribers converge on the next publish.
    pub async fn publish(&self, room_id: Uuid, feed: Feed) {
        let _guard = self.inner.publish_lock.lock().await;
        if self.inner.broadcast_tx.receiver_count() == 0 {
            return;
        }

        match self.read_snapshot(room_id, feed).await {
            Ok(Some(snapshot)) => {
                debug!("Publishing {:?} snapshot for room {}", feed, room_id);
                let _ = self.inner.broadcast_tx.send(Arc::new(snapshot));
            }
            Ok(None) => {}
            Err(e) => error!("Failed to read {:?} snapshot for room {}: {:#}", feed, room_id, e),
        }
    }

    pub async fn publish_many(&self, room_id: Uuid, feeds: &[Feed]) {
        for &feed in feeds {
            self.publish(room_id, feed).await;
        }
    }

    /// Open a subscription to some feeds of a room. The handle yields the
    /// current snapshot of every requested feed first, then one snapshot per
    /// change. Dropping the handle releases the subscription.
    pub async fn subscribe_room(
        &self,
        room_id: Uuid,
        feeds: &[Feed],
    ) -> anyhow::Result<RoomSubscription> {
        let feeds: HashSet<Feed> = feeds.iter().copied().collect();

        let _guard = self.inner.publish_lock.lock().await;
        let rx = self.inner.broadcast_tx.subscribe();

        let mut initial = VecDeque::new();
        for feed in Feed::ALL {
            if !feeds.contains(&feed) {
                continue;
            }
            if let Some(snapshot) = self.read_snapshot(room_id, feed).await? {
                initial.push_back(Arc::new(snapshot));
            }
        }

        Ok(RoomSubscription {
            room_id,
            feeds,
            initial,
            rx,
        })
    }

    async fn read_snapshot(&self, room_id: Uuid, feed: Feed) -> anyhow::Result<Option<Snapshot>> {
        let db = self.inner.db.clone();
        let event = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<GatewayEvent>> {
            let id = room_id.to_string();
            let event = match feed {
                Feed::Room => db
                    .room_document(&id)?
                    .map(|room| GatewayEvent::RoomSnapshot { room }),
                Feed::Strokes => Some(GatewayEvent::StrokesSnapshot {
                    room_id,
                    strokes: db.stroke_documents(&id)?,
                }),
                Feed::Messages => Some(GatewayEvent::MessagesSnapshot {
                    room_id,
                    messages: db.message_documents(&id)?,
                }),
                Feed::Settings => Some(GatewayEvent::SettingsSnapshot {
                    room_id,
                    settings: db.get_chat_settings(&id)?,
                }),
            };
            Ok(event)
        })
        .await??;

        event.map(|e| Snapshot::new(room_id, feed, e)).transpose()
    }
}

/// Live handle on some feeds of one room.
pub struct RoomSubscription {
    room_id: Uuid,
    feeds: HashSet<Feed>,
    initial: VecDeque<Arc<Snapshot>>,
    rx: broadcast::Receiver<Arc<Snapshot>>,
}

impl RoomSubscription {
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Next snapshot for this subscription. `None` once the dispatcher is gone.
    pub async fn next(&mut self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.initial.pop_front() {
            return Some(snapshot);
        }

        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    if snapshot.room_id == self.room_id && self.feeds.contains(&snapshot.feed) {
                        return Some(snapshot);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscription for room {} lagged by {} snapshots", self.room_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duo_types::models::{ChatSettings, IdentityProvider};
    use std::time::Duration;

    struct Fixture {
        dispatcher: Dispatcher,
        room_id: Uuid,
        user_id: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        db.upsert_user(&user_id.to_string(), "Ana", "", IdentityProvider::Anonymous)
            .unwrap();
        db.create_room(&room_id.to_string(), &user_id.to_string())
            .unwrap();
        Fixture {
            dispatcher: Dispatcher::new(db),
            room_id,
            user_id,
        }
    }

    async fn next(sub: &mut RoomSubscription) -> Arc<Snapshot> {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out waiting for snapshot")
            .expect("dispatcher closed")
    }

    #[tokio::test]
    async fn initial_snapshots_then_updates() {
        let f = fixture();
        let db = f.dispatcher.database().clone();
        let mut sub = f
            .dispatcher
            .subscribe_room(f.room_id, &[Feed::Strokes, Feed::Settings])
            .await
            .unwrap();

        match &next(&mut sub).await.event {
            GatewayEvent::StrokesSnapshot { strokes, .. } => assert!(strokes.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        match &next(&mut sub).await.event {
            GatewayEvent::SettingsSnapshot { settings, .. } => assert!(settings.is_none()),
            other => panic!("unexpected {other:?}"),
        }

        db.insert_stroke(
            &Uuid::new_v4().to_string(),
            &f.room_id.to_string(),
            "[]",
            "#000",
            4.0,
        )
        .unwrap();
        f.dispatcher.publish(f.room_id, Feed::Strokes).await;

        match &next(&mut sub).await.event {
            GatewayEvent::StrokesSnapshot { strokes, .. } => assert_eq!(strokes.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_other_rooms_and_feeds() {
        let f = fixture();
        let db = f.dispatcher.database().clone();
        let other_room = Uuid::new_v4();
        db.create_room(&other_room.to_string(), &f.user_id.to_string())
            .unwrap();

        let mut sub = f
            .dispatcher
            .subscribe_room(f.room_id, &[Feed::Settings])
            .await
            .unwrap();
        next(&mut sub).await;

        f.dispatcher.publish(other_room, Feed::Settings).await;
        f.dispatcher.publish(f.room_id, Feed::Messages).await;
        db.merge_chat_settings(&f.room_id.to_string(), &ChatSettings::defaults())
            .unwrap();
        f.dispatcher.publish(f.room_id, Feed::Settings).await;

        let snapshot = next(&mut sub).await;
        assert_eq!(snapshot.room_id, f.room_id);
        match &snapshot.event {
            GatewayEvent::SettingsSnapshot { settings, .. } => {
                assert_eq!(settings.as_ref(), Some(&ChatSettings::defaults()))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_handle_releases_subscription() {
        let f = fixture();
        let sub = f
            .dispatcher
            .subscribe_room(f.room_id, &Feed::ALL)
            .await
            .unwrap();
        assert_eq!(f.dispatcher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(f.dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn missing_room_has_no_room_snapshot() {
        let f = fixture();
        let mut sub = f
            .dispatcher
            .subscribe_room(Uuid::new_v4(), &[Feed::Room, Feed::Strokes])
            .await
            .unwrap();
        match &next(&mut sub).await.event {
            GatewayEvent::StrokesSnapshot { strokes, .. } => assert!(strokes.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
