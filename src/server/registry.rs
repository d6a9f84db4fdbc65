//! Session registry: concurrent username -> live session mapping

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::session::Session;

/// Concurrent map of online users, shared by all connection tasks.
///
/// A login while the username is already online replaces the registry entry
/// and hands the displaced session back to the caller, which closes it; the
/// old socket is never left registered-but-unreachable.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session, returning the displaced prior session for that
    /// username if one was online.
    pub async fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        inner.insert(session.username().to_string(), session)
    }

    /// Remove a session, but only if the entry still belongs to it. Returns
    /// false when the entry was already replaced by a newer login, in which
    /// case the caller must not announce a departure.
    pub async fn deregister(&self, username: &str, id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get(username) {
            Some(current) if current.id() == id => {
                inner.remove(username);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, username: &str) -> Option<Arc<Session>> {
        self.inner.read().await.get(username).cloned()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.inner.read().await.contains_key(username)
    }

    pub async fn online_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every online session, for broadcast fan-out.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::Outbound;
    use tokio::sync::mpsc;

    fn session(username: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(username.to_string(), "127.0.0.1:4000".parse().unwrap(), tx);
        (Arc::new(session), rx)
    }

    #[tokio::test]
    async fn test_register_lookup_deregister() {
        let registry = SessionRegistry::new();
        let (alice, _rx) = session("alice");

        assert!(registry.register(Arc::clone(&alice)).await.is_none());
        assert!(registry.is_online("alice").await);
        assert_eq!(
            registry.lookup("alice").await.unwrap().id(),
            alice.id()
        );

        assert!(registry.deregister("alice", alice.id()).await);
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn test_relogin_displaces_prior_session() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = session("alice");
        let (second, _rx2) = session("alice");

        registry.register(Arc::clone(&first)).await;
        let displaced = registry.register(Arc::clone(&second)).await.unwrap();
        assert_eq!(displaced.id(), first.id());

        // The displaced session's late cleanup must not evict the successor.
        assert!(!registry.deregister("alice", first.id()).await);
        assert!(registry.is_online("alice").await);
        assert!(registry.deregister("alice", second.id()).await);
    }

    #[tokio::test]
    async fn test_online_usernames_sorted() {
        let registry = SessionRegistry::new();
        let (bob, _rx1) = session("bob");
        let (alice, _rx2) = session("alice");
        registry.register(bob).await;
        registry.register(alice).await;

        assert_eq!(registry.online_usernames().await, vec!["alice", "bob"]);
    }
}
