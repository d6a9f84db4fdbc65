//! Offline mailbox: per-user queues of messages deferred while offline
//!
//! Entries are created lazily the first time a message targets an offline
//! user and drained wholesale the moment that user's next session comes
//! online.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Marker frame sent before a drained batch of queued messages.
pub const UNREAD_MARKER: &str = "=== offline messages ===";

#[derive(Debug, Default)]
pub struct OfflineMailbox {
    inner: RwLock<HashMap<String, Vec<String>>>,
}

impl OfflineMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a user's queue, creating it on first use.
    pub async fn push(&self, username: &str, message: impl Into<String>) {
        self.inner
            .write()
            .await
            .entry(username.to_string())
            .or_default()
            .push(message.into());
    }

    /// Take and delete a user's entire queue, preserving order. Returns an
    /// empty batch when nothing was queued.
    pub async fn drain(&self, username: &str) -> Vec<String> {
        self.inner.write().await.remove(username).unwrap_or_default()
    }

    /// Number of queued messages for a user.
    pub async fn pending(&self, username: &str) -> usize {
        self.inner
            .read()
            .await
            .get(username)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_preserves_order() {
        let mailbox = OfflineMailbox::new();
        mailbox.push("alice", "first").await;
        mailbox.push("alice", "second").await;
        mailbox.push("alice", "third").await;

        assert_eq!(mailbox.drain("alice").await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_drain_removes_queue() {
        let mailbox = OfflineMailbox::new();
        mailbox.push("alice", "hello").await;

        assert_eq!(mailbox.pending("alice").await, 1);
        assert_eq!(mailbox.drain("alice").await.len(), 1);
        assert_eq!(mailbox.pending("alice").await, 0);
        assert!(mailbox.drain("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_queues_are_per_user() {
        let mailbox = OfflineMailbox::new();
        mailbox.push("alice", "for alice").await;
        mailbox.push("bob", "for bob").await;

        assert_eq!(mailbox.drain("alice").await, vec!["for alice"]);
        assert_eq!(mailbox.pending("bob").await, 1);
    }
}
