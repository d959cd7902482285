use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use duo_types::events::{Feed, GatewayCommand, GatewayEvent};

use crate::dispatcher::{Dispatcher, Snapshot};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A client must send `Identify` within this window.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// What the send task writes to the socket.
enum Outbound {
    Snapshot(Arc<Snapshot>),
    Event(GatewayEvent),
}

/// Per-connection room subscriptions. Each one is a task forwarding a
/// `RoomSubscription` into the connection's outbound queue.
struct Subscriptions {
    forwarders: HashMap<Uuid, JoinHandle<()>>,
}

impl Subscriptions {
    fn new() -> Self {
        Self {
            forwarders: HashMap::new(),
        }
    }

    fn replace(&mut self, room_id: Uuid, forwarder: JoinHandle<()>) {
        if let Some(old) = self.forwarders.insert(room_id, forwarder) {
            old.abort();
        }
    }

    fn remove(&mut self, room_id: Uuid) {
        if let Some(old) = self.forwarders.remove(&room_id) {
            old.abort();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
    }
}

/// Handle a single WebSocket connection: Identify handshake, then
/// Subscribe/Unsubscribe commands until the socket closes.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", name, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, &name).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    name: &str,
) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound queue -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let sent = match msg {
                        Outbound::Snapshot(snapshot) => {
                            sender.send(Message::Text(snapshot.json.clone().into())).await
                        }
                        Outbound::Event(event) => send_event(&mut sender, &event).await,
                    };
                    if sent.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client commands
    let name_recv = name.to_string();
    let mut recv_task = tokio::spawn(async move {
        let mut subscriptions = Subscriptions::new();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher, user_id, &name_recv, cmd, &mut subscriptions, &out_tx)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use duo_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.name));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    name: &str,
    cmd: GatewayCommand,
    subscriptions: &mut Subscriptions,
    out_tx: &mpsc::UnboundedSender<Outbound>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { room_id, feeds } => {
            let feeds: Vec<Feed> = if feeds.is_empty() {
                Feed::ALL.to_vec()
            } else {
                feeds
            };

            if !is_member(dispatcher, room_id, user_id).await {
                warn!("{} ({}) denied subscription to room {}", name, user_id, room_id);
                let _ = out_tx.send(Outbound::Event(GatewayEvent::SubscriptionDenied { room_id }));
                return;
            }

            let mut subscription = match dispatcher.subscribe_room(room_id, &feeds).await {
                Ok(sub) => sub,
                Err(e) => {
                    error!("Failed to open subscription to room {}: {:#}", room_id, e);
                    return;
                }
            };

            info!("{} ({}) subscribed to {:?} of room {}", name, user_id, feeds, room_id);

            let tx = out_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(snapshot) = subscription.next().await {
                    if tx.send(Outbound::Snapshot(snapshot)).is_err() {
                        break;
                    }
                }
            });
            subscriptions.replace(room_id, forwarder);
        }

        GatewayCommand::Unsubscribe { room_id } => {
            info!("{} ({}) unsubscribed from room {}", name, user_id, room_id);
            subscriptions.remove(room_id);
        }
    }
}

async fn is_member(dispatcher: &Dispatcher, room_id: Uuid, user_id: Uuid) -> bool {
    let db = dispatcher.database().clone();
    let result = tokio::task::spawn_blocking(move || {
        db.is_member(&room_id.to_string(), &user_id.to_string())
    })
    .await;

    match result {
        Ok(Ok(member)) => member,
        Ok(Err(e)) => {
            error!("Membership check failed for room {}: {:#}", room_id, e);
            false
        }
        Err(e) => {
            error!("Membership check task failed: {}", e);
            false
        }
    }
}
