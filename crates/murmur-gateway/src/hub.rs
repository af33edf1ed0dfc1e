use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use murmur_types::events::Envelope;
use murmur_types::models::{Message, Status};

/// Outbound queue depth per session. A session that falls this far behind is evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A serialized envelope. Built once per broadcast and shared by every queue it lands on.
pub type Frame = Arc<str>;

pub fn encode(envelope: &Envelope) -> Option<Frame> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(Frame::from(text)),
        Err(e) => {
            error!("Failed to encode {} envelope: {}", envelope.type_name(), e);
            None
        }
    }
}

/// Registry entry for one live connection.
struct SessionEntry {
    conn_id: Uuid,
    /// The only strong sender of the session queue. Dropping it closes the queue.
    tx: mpsc::Sender<Frame>,
    /// Empty means "receive every channel".
    subscriptions: HashSet<String>,
}

impl SessionEntry {
    fn wants(&self, channel: &str) -> bool {
        self.subscriptions.is_empty() || self.subscriptions.contains(channel)
    }
}

/// Handed to a session when it joins the hub.
pub struct Registration {
    pub conn_id: Uuid,
    pub outbound: mpsc::Receiver<Frame>,
    pub replies: ReplySender,
}

/// Lets a session answer its own client without going through the registry.
///
/// Holds only a weak handle, so it never keeps an evicted session's queue open.
#[derive(Clone)]
pub struct ReplySender {
    tx: mpsc::WeakSender<Frame>,
}

impl ReplySender {
    pub fn send(&self, envelope: &Envelope) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        let Some(frame) = encode(envelope) else {
            return false;
        };

        match tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping {} reply: {}", envelope.type_name(), e);
                false
            }
        }
    }
}

/// Registry of live sessions and the fan-out engine.
///
/// All registry access goes through one RwLock: fan-out and lookups share it,
/// registration and subscription changes take it exclusively.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// username -> live session
    sessions: RwLock<HashMap<String, SessionEntry>>,
    queue_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: RwLock::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a session for `username`, replacing (and closing) any previous one.
    pub async fn register(&self, username: &str) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, outbound) = mpsc::channel(self.inner.queue_capacity);
        let replies = ReplySender { tx: tx.downgrade() };

        if let Some(frame) = encode(&Envelope::connected()) {
            // Fresh queue, cannot be full
            let _ = tx.try_send(frame);
        }

        let previous = self.inner.sessions.write().await.insert(
            username.to_string(),
            SessionEntry {
                conn_id,
                tx,
                subscriptions: HashSet::new(),
            },
        );

        if let Some(previous) = previous {
            info!(
                "{} reconnected, evicting previous session {}",
                username, previous.conn_id
            );
        }
        info!("{} registered session {}", username, conn_id);

        Registration {
            conn_id,
            outbound,
            replies,
        }
    }

    /// Remove the session if `conn_id` is still the current one for `username`,
    /// then tell everyone else the user went offline.
    pub async fn unregister(&self, username: &str, conn_id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.inner.sessions.write().await;
            let is_current = sessions
                .get(username)
                .is_some_and(|entry| entry.conn_id == conn_id);
            if is_current {
                sessions.remove(username)
            } else {
                None
            }
        };

        if removed.is_none() {
            // Replaced by a newer connection or already evicted
            return false;
        }
        info!("{} unregistered session {}", username, conn_id);

        let offline = Envelope::StatusUpdate {
            username: username.to_string(),
            status: Status::Offline,
        };
        if let Some(frame) = encode(&offline) {
            self.fan_out(frame, |name, _| name != username).await;
        }
        true
    }

    /// Deliver a `channel_message` to every session subscribed to `channel`
    /// (or subscribed to nothing). Returns the number of sessions reached.
    pub async fn broadcast_to_channel(&self, channel: &str, message: &Message) -> usize {
        let envelope = Envelope::ChannelMessage {
            channel: channel.to_string(),
            message: message.clone(),
        };
        let Some(frame) = encode(&envelope) else {
            return 0;
        };

        let delivered = self.fan_out(frame, |_, entry| entry.wants(channel)).await;
        debug!(
            "Broadcast to #{}: {} ({} recipients)",
            channel,
            preview(&message.text, 50),
            delivered
        );
        delivered
    }

    /// Deliver a `status_update` to every registered session, the subject included.
    pub async fn broadcast_status_update(&self, username: &str, status: Status) -> usize {
        let envelope = Envelope::StatusUpdate {
            username: username.to_string(),
            status,
        };
        let Some(frame) = encode(&envelope) else {
            return 0;
        };

        let delivered = self.fan_out(frame, |_, _| true).await;
        debug!("Status {} -> {} ({} recipients)", username, status, delivered);
        delivered
    }

    /// Returns false if `username` has no live session.
    pub async fn add_subscription(&self, username: &str, channel: &str) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(username) {
            Some(entry) => {
                if entry.subscriptions.insert(channel.to_string()) {
                    debug!("{} subscribed to #{}", username, channel);
                }
                true
            }
            None => false,
        }
    }

    /// Returns false if `username` has no live session.
    pub async fn remove_subscription(&self, username: &str, channel: &str) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(username) {
            Some(entry) => {
                if entry.subscriptions.remove(channel) {
                    debug!("{} unsubscribed from #{}", username, channel);
                }
                true
            }
            None => false,
        }
    }

    pub async fn subscriptions(&self, username: &str) -> Option<HashSet<String>> {
        self.inner
            .sessions
            .read()
            .await
            .get(username)
            .map(|entry| entry.subscriptions.clone())
    }

    pub async fn is_registered(&self, username: &str) -> bool {
        self.inner.sessions.read().await.contains_key(username)
    }

    pub async fn connected_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Non-blocking push of `frame` to every session `wants` selects. Sessions
    /// whose queue is full or gone are evicted afterwards.
    async fn fan_out<F>(&self, frame: Frame, mut wants: F) -> usize
    where
        F: FnMut(&str, &SessionEntry) -> bool,
    {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let sessions = self.inner.sessions.read().await;
            for (username, entry) in sessions.iter() {
                if !wants(username, entry) {
                    continue;
                }
                match entry.tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("{} outbound queue full, evicting slow consumer", username);
                        dead.push((username.clone(), entry.conn_id));
                    }
                    Err(TrySendError::Closed(_)) => {
                        dead.push((username.clone(), entry.conn_id));
                    }
                }
            }
        }

        if !dead.is_empty() {
            self.evict(dead).await;
        }
        delivered
    }

    async fn evict(&self, dead: Vec<(String, Uuid)>) {
        let mut sessions = self.inner.sessions.write().await;
        for (username, conn_id) in dead {
            // Skip if a new connection registered since the failed push
            let is_current = sessions
                .get(&username)
                .is_some_and(|entry| entry.conn_id == conn_id);
            if is_current {
                sessions.remove(&username);
                info!("Evicted {} ({})", username, conn_id);
            }
        }
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
