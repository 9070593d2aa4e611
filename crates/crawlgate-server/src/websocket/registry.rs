//! Connection registry — the only state shared across gateway tasks.
//!
//! Maps client ids to live sessions behind a reader/writer lock:
//! concurrent lookups from the dispatcher, exclusive writes from the
//! accept and teardown paths. No I/O happens while the lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crawlgate_core::ids::ClientId;
use tokio::sync::RwLock;

use super::session::ClientSession;

/// Registry of live client sessions, keyed by client id.
///
/// A session is inserted exactly once when its connection is
/// accepted and removed exactly once when its inbound loop exits.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ClientId, Arc<ClientSession>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session under its id.
    pub async fn insert(&self, session: Arc<ClientSession>) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.id.clone(), session);
    }

    /// Look up a session by client id.
    pub async fn get(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, returning it if it was registered.
    pub async fn remove(&self, id: &ClientId) -> Option<Arc<ClientSession>> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id)
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sessions with no inbound activity for at least `window`.
    pub async fn idle_sessions(&self, window: Duration) -> Vec<Arc<ClientSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.idle_for() >= window)
            .cloned()
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn make_session(id: &str) -> Arc<ClientSession> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(ClientSession::new(
            ClientId::from_raw(id),
            tx,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn insert_then_get() {
        let registry = ConnectionRegistry::new();
        let session = make_session("c1");
        registry.insert(session.clone()).await;
        let found = registry.get(&ClientId::from_raw("c1")).await.unwrap();
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.get(&ClientId::from_raw("nope")).await.is_none());
    }

    #[tokio::test]
    async fn remove_makes_get_absent() {
        let registry = ConnectionRegistry::new();
        registry.insert(make_session("c1")).await;
        assert!(registry.remove(&ClientId::from_raw("c1")).await.is_some());
        assert!(registry.get(&ClientId::from_raw("c1")).await.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove(&ClientId::from_raw("nope")).await.is_none());
    }

    #[tokio::test]
    async fn count_tracks_inserts_and_removes() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count().await, 0);
        registry.insert(make_session("c1")).await;
        registry.insert(make_session("c2")).await;
        assert_eq!(registry.count().await, 2);
        let _ = registry.remove(&ClientId::from_raw("c1")).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn reinsert_same_id_keeps_one_entry() {
        let registry = ConnectionRegistry::new();
        registry.insert(make_session("c1")).await;
        registry.insert(make_session("c1")).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_and_lookups() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let reg = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let id = format!("c{i}");
                reg.insert(make_session(&id)).await;
                assert!(reg.get(&ClientId::from_raw(&id)).await.is_some());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.count().await, 50);

        let mut handles = Vec::new();
        for i in 0..50 {
            let reg = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let id = ClientId::from_raw(format!("c{i}"));
                assert!(reg.remove(&id).await.is_some());
                assert!(reg.get(&id).await.is_none());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn idle_sessions_filters_by_window() {
        let registry = ConnectionRegistry::new();
        let fresh = make_session("fresh");
        let stale = make_session("stale");
        stale.force_idle_for_test(Duration::from_secs(120));
        registry.insert(fresh).await;
        registry.insert(stale).await;

        let idle = registry.idle_sessions(Duration::from_secs(60)).await;
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id.as_str(), "stale");
    }

    #[tokio::test]
    async fn idle_sessions_empty_registry() {
        let registry = ConnectionRegistry::new();
        assert!(registry.idle_sessions(Duration::from_secs(1)).await.is_empty());
    }
}
