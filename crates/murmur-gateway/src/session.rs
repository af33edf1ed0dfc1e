use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use murmur_db::Store;
use murmur_types::events::Envelope;
use murmur_types::models::Status;

use crate::hub::{Frame, Hub, ReplySender, preview};
use crate::presence::Presence;

/// Server sends a WebSocket Ping this often.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// A connection with no inbound frame (Pong included) for this long is dropped.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub const MAX_FRAME_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ping_interval: Duration,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            read_deadline: READ_DEADLINE,
            write_deadline: WRITE_DEADLINE,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Drive one authenticated WebSocket connection until it closes.
///
/// Registers with the hub, subscribes to every public channel, then runs a
/// reader and a writer task. When either ends the other is aborted and the
/// session is unregistered.
pub async fn run_session(
    socket: WebSocket,
    username: String,
    hub: Hub,
    presence: Presence,
    store: Arc<dyn Store>,
    config: SessionConfig,
) {
    let (sender, receiver) = socket.split();

    let registration = hub.register(&username).await;
    let conn_id = registration.conn_id;
    info!("{} ({}) connected to gateway", username, conn_id);

    auto_subscribe(&hub, &store, &username).await;
    mark_online(&hub, &presence, &username).await;

    let mut send_task = tokio::spawn(write_loop(
        sender,
        registration.outbound,
        config,
        username.clone(),
    ));
    let mut recv_task = tokio::spawn(read_loop(
        receiver,
        hub.clone(),
        registration.replies,
        config,
        username.clone(),
    ));

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Only the current connection marks the user offline; a replaced one just leaves
    if hub.unregister(&username, conn_id).await {
        presence.update_status(&username, Status::Offline).await;
    }
    info!("{} ({}) disconnected from gateway", username, conn_id);
}

/// One-time snapshot: channels created later need an explicit subscribe.
async fn auto_subscribe(hub: &Hub, store: &Arc<dyn Store>, username: &str) {
    let store = store.clone();
    let channels = match tokio::task::spawn_blocking(move || store.list_channels()).await {
        Ok(Ok(channels)) => channels,
        Ok(Err(e)) => {
            warn!("Auto-subscribe for {} could not list channels: {}", username, e);
            return;
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            return;
        }
    };

    let mut subscribed = 0;
    for channel in channels.iter().filter(|c| !c.is_private) {
        if hub.add_subscription(username, &channel.name).await {
            subscribed += 1;
        }
    }
    debug!("{} auto-subscribed to {} public channels", username, subscribed);
}

/// A reconnect without a fresh login still brings an offline user back online.
async fn mark_online(hub: &Hub, presence: &Presence, username: &str) {
    let is_offline = presence
        .get(username)
        .await
        .is_some_and(|user| user.status == Status::Offline);
    if is_offline && presence.update_status(username, Status::Online).await.is_some() {
        hub.broadcast_status_update(username, Status::Online).await;
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Frame>,
    config: SessionConfig,
    username: String,
) {
    let mut keepalive = tokio::time::interval(config.ping_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Unregistered, replaced or evicted
                    debug!("{} outbound queue closed", username);
                    send_with_deadline(&mut sender, WsMessage::Close(None), config.write_deadline).await;
                    break;
                };
                trace!("{} <- {} bytes", username, frame.len());
                if !send_with_deadline(&mut sender, WsMessage::Text(frame.to_string().into()), config.write_deadline).await {
                    break;
                }
            }
            _ = keepalive.tick() => {
                if !send_with_deadline(&mut sender, WsMessage::Ping(Vec::new().into()), config.write_deadline).await {
                    break;
                }
            }
        }
    }
}

async fn send_with_deadline(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    msg: WsMessage,
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("WebSocket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("WebSocket write deadline exceeded");
            false
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    hub: Hub,
    replies: ReplySender,
    config: SessionConfig,
    username: String,
) {
    loop {
        let msg = match tokio::time::timeout(config.read_deadline, receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!("{} read error: {}", username, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("{} missed the keep-alive deadline, dropping connection", username);
                break;
            }
        };

        match msg {
            WsMessage::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => dispatch(&hub, &replies, &username, envelope).await,
                Err(e) => {
                    debug!(
                        "{} sent unusable frame: {} -- raw: {}",
                        username,
                        e,
                        preview(&text, 200)
                    );
                }
            },
            WsMessage::Close(_) => break,
            // Ping replies are handled by the websocket layer; any frame refreshes the deadline
            _ => {}
        }
    }
}

/// Handle one client control frame.
async fn dispatch(hub: &Hub, replies: &ReplySender, username: &str, envelope: Envelope) {
    match envelope {
        Envelope::Ping => {
            replies.send(&Envelope::Pong);
        }
        Envelope::SubscribeChannel(channel) => {
            if channel.is_empty() {
                return;
            }
            let success = hub.add_subscription(username, &channel).await;
            replies.send(&Envelope::Subscribed { channel, success });
        }
        Envelope::UnsubscribeChannel(channel) => {
            hub.remove_subscription(username, &channel).await;
        }
        other => {
            trace!("{} sent server-only frame {}, ignoring", username, other.type_name());
        }
    }
}
