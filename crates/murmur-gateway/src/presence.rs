use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use murmur_db::{Store, StoreError};
use murmur_types::models::{Status, User};

/// Who is known, what their status is, and which tokens map to them.
///
/// Independent of live sockets: a user can sit here as `away` with no session
/// in the hub. Writes to the store are best-effort and happen in order on a
/// background task; a failed write is logged and never surfaces to the caller.
#[derive(Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    directory: RwLock<Directory>,
    store: Arc<dyn Store>,
    persist_tx: mpsc::UnboundedSender<User>,
}

#[derive(Default)]
struct Directory {
    /// username -> user
    users: HashMap<String, User>,
    /// token -> username
    tokens: HashMap<String, String>,
}

impl Presence {
    /// Must be called from within a tokio runtime; spawns the persistence task.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(store.clone(), persist_rx));

        Self {
            inner: Arc::new(PresenceInner {
                directory: RwLock::new(Directory::default()),
                store,
                persist_tx,
            }),
        }
    }

    /// Warm the directory from persisted users. Run once at startup.
    pub async fn load_from_store(&self) -> Result<usize, StoreError> {
        let store = self.inner.store.clone();
        let users = tokio::task::spawn_blocking(move || store.load_users())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        let count = users.len();

        let mut dir = self.inner.directory.write().await;
        for user in users {
            dir.users.insert(user.username.clone(), user);
        }

        info!("Loaded {} users from store", count);
        Ok(count)
    }

    /// Create the user, or mark an existing one online again.
    pub async fn register_or_refresh(&self, username: &str, email: &str) -> User {
        let user = {
            let mut dir = self.inner.directory.write().await;
            match dir.users.get_mut(username) {
                Some(existing) => {
                    existing.set_status(Status::Online);
                    existing.clone()
                }
                None => {
                    let user = User::new(username, email);
                    dir.users.insert(username.to_string(), user.clone());
                    info!("User registered: {} ({})", username, email);
                    user
                }
            }
        };

        self.persist(&user);
        user
    }

    pub async fn get(&self, username: &str) -> Option<User> {
        self.inner.directory.read().await.users.get(username).cloned()
    }

    pub async fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .inner
            .directory
            .read()
            .await
            .users
            .values()
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// `None` if the username is unknown. Broadcasting the change is the caller's job.
    pub async fn update_status(&self, username: &str, status: Status) -> Option<User> {
        let user = {
            let mut dir = self.inner.directory.write().await;
            let Some(user) = dir.users.get_mut(username) else {
                debug!("Status update for unknown user {}", username);
                return None;
            };
            user.set_status(status);
            user.clone()
        };

        info!("User {} status updated to: {}", username, status);
        self.persist(&user);
        Some(user)
    }

    pub async fn issue_token(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.inner
            .directory
            .write()
            .await
            .tokens
            .insert(token.clone(), username.to_string());
        token
    }

    /// `None` means "not authenticated".
    pub async fn resolve_token(&self, token: &str) -> Option<User> {
        let dir = self.inner.directory.read().await;
        let username = dir.tokens.get(token)?;
        dir.users.get(username).cloned()
    }

    /// Returns the username the token belonged to.
    pub async fn revoke_token(&self, token: &str) -> Option<String> {
        self.inner.directory.write().await.tokens.remove(token)
    }

    /// Mark every user offline. Run once at startup, before any session can exist.
    pub async fn reset_all_to_offline(&self) -> usize {
        let changed: Vec<User> = {
            let mut dir = self.inner.directory.write().await;
            dir.users
                .values_mut()
                .filter(|user| user.status != Status::Offline)
                .map(|user| {
                    user.set_status(Status::Offline);
                    user.clone()
                })
                .collect()
        };

        for user in &changed {
            self.persist(user);
        }
        info!("Reset {} users to offline", changed.len());
        changed.len()
    }

    fn persist(&self, user: &User) {
        if self.inner.persist_tx.send(user.clone()).is_err() {
            warn!("Persistence task gone, not saving user {}", user.username);
        }
    }
}

async fn persist_loop(store: Arc<dyn Store>, mut rx: mpsc::UnboundedReceiver<User>) {
    while let Some(user) = rx.recv().await {
        let store = store.clone();
        let username = user.username.clone();
        match tokio::task::spawn_blocking(move || store.save_user(&user)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist user {}: {}", username, e),
            Err(e) => warn!("spawn_blocking join error persisting {}: {}", username, e),
        }
    }
}
