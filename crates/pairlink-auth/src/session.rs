//! Session table and lifecycle
//!
//! Sessions exist only after a completed claim/confirm round trip. Each
//! record carries its own lock so activity on one session never blocks
//! another; the table lock is held only for lookup and insert/remove.

use chrono::{DateTime, Utc};
use pairlink_core::{Error, Result, Secret, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts at drawing an unused session id before giving up
const ID_RESERVE_ATTEMPTS: usize = 16;

/// Lifecycle state of an established session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// An authenticated communication context created by a successful handshake
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub secret: Secret,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub state: SessionState,
}

impl Session {
    fn new(id: SessionId, secret: Secret) -> Self {
        let now = Utc::now();
        Self {
            id,
            secret,
            created_at: now,
            last_activity_at: now,
            state: SessionState::Active,
        }
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_activity_at
    }
}

/// Tracks active sessions keyed by session id.
///
/// Session ids are never reused within a process lifetime; `close` is
/// idempotent so shutdown and sweep races collapse into no-ops.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    seen_ids: Mutex<HashSet<SessionId>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            seen_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Draw a session id that has never been used in this process.
    ///
    /// A collision from the random source is astronomically unlikely;
    /// exhausting the retry budget means the source is broken and is
    /// reported as a generation failure.
    pub async fn fresh_id(&self) -> Result<SessionId> {
        let mut seen = self.seen_ids.lock().await;
        for _ in 0..ID_RESERVE_ATTEMPTS {
            let id = SessionId::from_uuid(Uuid::new_v4());
            if seen.insert(id) {
                return Ok(id);
            }
        }
        Err(Error::Generation(
            "session id space exhausted by repeated collisions".to_string(),
        ))
    }

    /// Register a session once the confirm round trip has completed
    pub async fn on_confirmed(&self, id: SessionId, secret: Secret) -> Result<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(Error::Protocol(format!("session id {} already in use", id)));
        }
        self.seen_ids.lock().await.insert(id);

        let session = Arc::new(Mutex::new(Session::new(id, secret)));
        sessions.insert(id, session.clone());
        info!(session_id = %id, "session established");
        Ok(session)
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Record activity on a session
    pub async fn touch(&self, id: &SessionId) -> Result<()> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let mut session = session.lock().await;
        session.last_activity_at = Utc::now();
        Ok(())
    }

    /// Close a session. Idempotent: closing an already-closed or unknown
    /// session is a no-op.
    pub async fn close(&self, id: &SessionId) {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                let mut session = session.lock().await;
                if session.state == SessionState::Active {
                    session.state = SessionState::Closed;
                    info!(session_id = %id, "session closed");
                }
            }
            None => debug!(session_id = %id, "close on unknown session ignored"),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session idle past `idle_timeout`
    pub async fn sweep_idle(&self, idle_timeout: Duration) {
        let now = Utc::now();
        let idle_timeout = match chrono::Duration::from_std(idle_timeout) {
            Ok(d) => d,
            Err(e) => {
                warn!("idle timeout out of range, skipping sweep: {}", e);
                return;
            }
        };

        let snapshot: Vec<(SessionId, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        for (id, session) in snapshot {
            let idle = session.lock().await.idle_for(now);
            if idle > idle_timeout {
                debug!(session_id = %id, idle_secs = idle.num_seconds(), "sweeping idle session");
                self.close(&id).await;
            }
        }
    }

    /// Run the idle sweep at a fixed interval until `shutdown` flips
    pub fn spawn_sweeper(
        self: Arc<Self>,
        idle_timeout: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_idle(idle_timeout).await;
                    }
                    _ = shutdown.changed() => {
                        debug!("session sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairlink_core::config::SECRET_LEN;

    fn secret() -> Secret {
        Secret::new([5u8; SECRET_LEN])
    }

    #[tokio::test]
    async fn confirmed_sessions_are_retrievable() {
        let manager = SessionManager::new();
        let id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(id, secret()).await.unwrap();

        let session = manager.get(&id).await.unwrap();
        assert_eq!(session.lock().await.state, SessionState::Active);
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_session_id_is_a_protocol_error() {
        let manager = SessionManager::new();
        let id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(id, secret()).await.unwrap();

        let err = manager.on_confirmed(id, secret()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let manager = SessionManager::new();
        let id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(id, secret()).await.unwrap();

        manager.close(&id).await;
        manager.close(&id).await;
        assert!(manager.get(&id).await.is_none());

        // Unknown id is also a no-op.
        let unknown = manager.fresh_id().await.unwrap();
        manager.close(&unknown).await;
    }

    #[tokio::test]
    async fn touch_updates_activity() {
        let manager = SessionManager::new();
        let id = manager.fresh_id().await.unwrap();
        let session = manager.on_confirmed(id, secret()).await.unwrap();
        let before = session.lock().await.last_activity_at;

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.touch(&id).await.unwrap();
        assert!(session.lock().await.last_activity_at > before);
    }

    #[tokio::test]
    async fn touch_on_unknown_session_errors() {
        let manager = SessionManager::new();
        let id = manager.fresh_id().await.unwrap();
        let err = manager.touch(&id).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn sweep_closes_only_idle_sessions() {
        let manager = SessionManager::new();
        let idle_id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(idle_id, secret()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let fresh_id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(fresh_id, secret()).await.unwrap();

        manager.sweep_idle(Duration::from_millis(25)).await;
        assert!(manager.get(&idle_id).await.is_none());
        assert!(manager.get(&fresh_id).await.is_some());
    }

    #[tokio::test]
    async fn sweeper_task_stops_on_shutdown() {
        let manager = Arc::new(SessionManager::new());
        let (tx, rx) = watch::channel(false);
        let handle = manager.clone().spawn_sweeper(
            Duration::from_millis(20),
            Duration::from_millis(10),
            rx,
        );

        let id = manager.fresh_id().await.unwrap();
        manager.on_confirmed(id, secret()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(manager.get(&id).await.is_none());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
