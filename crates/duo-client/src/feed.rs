use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use duo_types::events::{Feed, GatewayCommand, GatewayEvent};

use crate::error::{ClientError, Result};
use crate::http::DuoClient;

/// How long to wait for the gateway to accept the token.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A live subscription to the feeds of one room.
///
/// Events arrive in the order the server published them. Dropping the feed
/// closes the socket.
pub struct RoomFeed {
    room_id: Uuid,
    user_id: Uuid,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    reader: JoinHandle<()>,
}

impl RoomFeed {
    pub async fn connect(client: &DuoClient, room_id: Uuid, feeds: &[Feed]) -> Result<Self> {
        let token = client.token().ok_or(ClientError::NotSignedIn)?;
        let url = client.gateway_url();
        let (ws, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        send_command(
            &mut ws_tx,
            &GatewayCommand::Identify {
                token: token.to_string(),
            },
        )
        .await?;

        let user_id = match tokio::time::timeout(READY_TIMEOUT, next_event(&mut ws_rx)).await {
            Ok(Some(GatewayEvent::Ready { user_id, .. })) => user_id,
            Ok(Some(other)) => {
                warn!("Expected Ready from gateway, got {:?}", other);
                return Err(ClientError::Closed("ready"));
            }
            Ok(None) | Err(_) => return Err(ClientError::Closed("ready")),
        };

        send_command(
            &mut ws_tx,
            &GatewayCommand::Subscribe {
                room_id,
                feeds: feeds.to_vec(),
            },
        )
        .await?;
        info!("Subscribed to room {} as {}", room_id, user_id);

        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            // The write half stays alive with the task so the socket is not
            // half-closed; pings are answered by tungstenite itself.
            let _ws_tx = ws_tx;
            while let Some(event) = next_event(&mut ws_rx).await {
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Feed for room {} ended", room_id);
        });

        Ok(Self {
            room_id,
            user_id,
            events,
            reader,
        })
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// The user the gateway authenticated.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Next event, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<GatewayEvent> {
        self.events.recv().await
    }
}

impl Drop for RoomFeed {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn send_command<S>(ws_tx: &mut S, cmd: &GatewayCommand) -> Result<()>
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(cmd)?;
    ws_tx.send(WsMessage::text(json)).await?;
    Ok(())
}

/// Reads until the next gateway event. Unparseable frames are skipped.
async fn next_event<S>(ws_rx: &mut S) -> Option<GatewayEvent>
where
    S: StreamExt<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(event) => return Some(event),
                Err(e) => warn!("Dropping malformed gateway frame: {}", e),
            },
            Ok(WsMessage::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                debug!("Gateway read failed: {}", e);
                return None;
            }
        }
    }
    None
}
