//! Message routing: broadcast, private, and group delivery
//!
//! Every delivered line is also appended to each recipient's chat log, and
//! recipients who are offline get the line queued in their mailbox instead.
//! Sends never block: each session owns an unbounded outbound queue drained
//! by its own writer task, so one slow client cannot stall a fan-out.

use std::sync::Arc;

use tracing::debug;

use crate::server::groups::GroupStore;
use crate::server::mailbox::OfflineMailbox;
use crate::server::registry::SessionRegistry;
use crate::server::session::Session;
use crate::server::store::{ChatLog, UserDirectory};

pub struct DeliveryEngine {
    registry: Arc<SessionRegistry>,
    groups: Arc<GroupStore>,
    mailbox: Arc<OfflineMailbox>,
    chat_log: Arc<ChatLog>,
    users: Arc<UserDirectory>,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        groups: Arc<GroupStore>,
        mailbox: Arc<OfflineMailbox>,
        chat_log: Arc<ChatLog>,
        users: Arc<UserDirectory>,
    ) -> Self {
        Self {
            registry,
            groups,
            mailbox,
            chat_log,
            users,
        }
    }

    /// Deliver a line to every connected session and queue it for every
    /// registered user who is offline.
    pub async fn broadcast(&self, line: &str) {
        debug!("Broadcast: {}", line);
        for session in self.registry.sessions().await {
            session.send(line);
            self.chat_log.append(session.username(), line).await;
        }
        for username in self.users.usernames() {
            if !self.registry.is_online(&username).await {
                self.queue_offline(&username, line).await;
            }
        }
    }

    /// Deliver a private message. Private messages always carry the real
    /// username, never the anonymous alias.
    pub async fn private(&self, sender: &Session, to: &str, text: &str) {
        if !self.users.contains(to) {
            let reply = format!("user [{}] does not exist", to);
            sender.send(reply.as_str());
            self.chat_log.append(sender.username(), &reply).await;
            return;
        }

        let full = format!("[{}] (private): {}", sender.username(), text);
        match self.registry.lookup(to).await {
            Some(recipient) => {
                recipient.send(full.as_str());
                self.chat_log.append(to, &full).await;
                sender.send(full.as_str());
                self.chat_log.append(sender.username(), &full).await;
            }
            None => {
                self.queue_offline(to, &full).await;
                self.chat_log.append(sender.username(), &full).await;
                let notice = format!(
                    "user [{}] is offline; message will be delivered on next login",
                    to
                );
                sender.send(notice.as_str());
                self.chat_log.append(sender.username(), &notice).await;
            }
        }
    }

    /// Deliver a group message from a session. The sender must be on the
    /// group's permanent roster. Group traffic uses the display name, so
    /// anonymous mode applies here.
    pub async fn group(&self, sender: &Session, group_id: &str, text: &str) {
        if !self.groups.contains(group_id).await {
            sender.send(format!("group [{}] does not exist", group_id));
            return;
        }
        if !self.groups.is_member(group_id, sender.username()).await {
            sender.send(format!("you are not a member of group [{}]", group_id));
            return;
        }
        let msg = format!("[{}]: {}", sender.display_name(), text);
        self.group_notice(group_id, &msg).await;
    }

    /// Deliver a server-originated line to a group: present members get it
    /// live, roster members who are offline get it queued. Roster members
    /// who left the group while staying connected get neither.
    pub async fn group_notice(&self, group_id: &str, msg: &str) {
        let name = match self.groups.name_of(group_id).await {
            Some(name) => name,
            None => return,
        };
        let full = format!("[group-{}] {}", name, msg);

        for username in self.groups.present_members(group_id).await {
            if let Some(session) = self.registry.lookup(&username).await {
                session.send(full.as_str());
                self.chat_log.append(&username, &full).await;
            }
        }
        for username in self.groups.roster(group_id).await {
            if !self.registry.is_online(&username).await {
                self.queue_offline(&username, &full).await;
            }
        }
    }

    /// Queue a line for an offline user and record it in their history.
    pub async fn queue_offline(&self, username: &str, line: &str) {
        self.mailbox.push(username, line).await;
        self.chat_log.append(username, line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::Outbound;
    use tokio::sync::mpsc;

    struct Harness {
        engine: DeliveryEngine,
        registry: Arc<SessionRegistry>,
        groups: Arc<GroupStore>,
        mailbox: Arc<OfflineMailbox>,
        _dir: tempfile::TempDir,
    }

    async fn harness(user_lines: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("users.txt");
        tokio::fs::write(&users_path, user_lines).await.unwrap();

        let registry = Arc::new(SessionRegistry::new());
        let groups = Arc::new(GroupStore::in_memory(dir.path()));
        let mailbox = Arc::new(OfflineMailbox::new());
        let chat_log = Arc::new(ChatLog::open(dir.path().join("chat_logs")).await.unwrap());
        let users = Arc::new(UserDirectory::load(users_path).await.unwrap());

        let engine = DeliveryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&groups),
            Arc::clone(&mailbox),
            chat_log,
            users,
        );
        Harness {
            engine,
            registry,
            groups,
            mailbox,
            _dir: dir,
        }
    }

    fn test_session(username: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            username.to_string(),
            "127.0.0.1:0".parse().unwrap(),
            tx,
        ));
        (session, rx)
    }

    fn drain_text(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Text(line) = item {
                lines.push(line);
            }
        }
        lines
    }

    #[tokio::test]
    async fn test_broadcast_reaches_online_and_queues_offline() {
        let h = harness("alice,pw\nbob,pw\ncarol,pw\n").await;
        let (alice, mut alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        h.registry.register(alice).await;
        h.registry.register(bob).await;

        h.engine.broadcast("alice: hello everyone").await;

        assert_eq!(drain_text(&mut alice_rx), vec!["alice: hello everyone"]);
        assert_eq!(drain_text(&mut bob_rx), vec!["alice: hello everyone"]);
        assert_eq!(h.mailbox.pending("carol").await, 1);
        assert_eq!(h.mailbox.pending("alice").await, 0);
    }

    #[tokio::test]
    async fn test_private_to_online_user_echoes_sender() {
        let h = harness("alice,pw\nbob,pw\n").await;
        let (alice, mut alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        h.registry.register(Arc::clone(&alice)).await;
        h.registry.register(bob).await;

        h.engine.private(&alice, "bob", "psst").await;

        assert_eq!(drain_text(&mut bob_rx), vec!["[alice] (private): psst"]);
        assert_eq!(drain_text(&mut alice_rx), vec!["[alice] (private): psst"]);
        assert_eq!(h.mailbox.pending("bob").await, 0);
    }

    #[tokio::test]
    async fn test_private_to_offline_user_queues_and_notifies() {
        let h = harness("alice,pw\nbob,pw\n").await;
        let (alice, mut alice_rx) = test_session("alice");
        h.registry.register(Arc::clone(&alice)).await;

        h.engine.private(&alice, "bob", "see you").await;

        // The sender gets only the queued notice; the echo is reserved for
        // deliveries that actually went out.
        let lines = drain_text(&mut alice_rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("user [bob] is offline"));

        let queued = h.mailbox.drain("bob").await;
        assert_eq!(queued, vec!["[alice] (private): see you"]);
    }

    #[tokio::test]
    async fn test_private_to_unknown_user_errors_sender_only() {
        let h = harness("alice,pw\n").await;
        let (alice, mut alice_rx) = test_session("alice");
        h.registry.register(Arc::clone(&alice)).await;

        h.engine.private(&alice, "mallory", "hi").await;

        let lines = drain_text(&mut alice_rx);
        assert_eq!(lines, vec!["user [mallory] does not exist"]);
        assert_eq!(h.mailbox.pending("mallory").await, 0);
    }

    #[tokio::test]
    async fn test_private_uses_real_name_even_when_anonymous() {
        let h = harness("alice,pw\nbob,pw\n").await;
        let (alice, _alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        alice.toggle_anonymous();
        h.registry.register(Arc::clone(&alice)).await;
        h.registry.register(bob).await;

        h.engine.private(&alice, "bob", "no hiding here").await;

        let lines = drain_text(&mut bob_rx);
        assert_eq!(lines, vec!["[alice] (private): no hiding here"]);
    }

    #[tokio::test]
    async fn test_group_message_routes_to_present_queues_offline_roster() {
        let h = harness("alice,pw\nbob,pw\ncarol,pw\n").await;
        h.groups.create("g1", "team").await;
        h.groups.join("g1", "alice").await;
        h.groups.join("g1", "bob").await;
        h.groups.join("g1", "carol").await;
        // carol is on the roster but offline
        h.groups.set_online_all("carol", false).await;

        let (alice, mut alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        h.registry.register(Arc::clone(&alice)).await;
        h.registry.register(bob).await;

        h.engine.group(&alice, "g1", "standup time").await;

        let expected = "[group-team] [alice]: standup time";
        assert_eq!(drain_text(&mut alice_rx), vec![expected]);
        assert_eq!(drain_text(&mut bob_rx), vec![expected]);
        assert_eq!(h.mailbox.drain("carol").await, vec![expected]);
    }

    #[tokio::test]
    async fn test_group_message_rejected_for_non_member() {
        let h = harness("alice,pw\nbob,pw\n").await;
        h.groups.create("g1", "team").await;
        h.groups.join("g1", "bob").await;

        let (alice, mut alice_rx) = test_session("alice");
        h.registry.register(Arc::clone(&alice)).await;

        h.engine.group(&alice, "g1", "let me in").await;
        let lines = drain_text(&mut alice_rx);
        assert_eq!(lines, vec!["you are not a member of group [g1]"]);

        h.engine.group(&alice, "nope", "hello").await;
        let lines = drain_text(&mut alice_rx);
        assert_eq!(lines, vec!["group [nope] does not exist"]);
    }

    #[tokio::test]
    async fn test_group_message_uses_display_alias() {
        let h = harness("alice,pw\nbob,pw\n").await;
        h.groups.create("g1", "team").await;
        h.groups.join("g1", "alice").await;
        h.groups.join("g1", "bob").await;

        let (alice, _alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        alice.toggle_anonymous();
        h.registry.register(Arc::clone(&alice)).await;
        h.registry.register(bob).await;

        h.engine.group(&alice, "g1", "guess who").await;

        let lines = drain_text(&mut bob_rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[group-team] [anon-"));
        assert!(!lines[0].contains("alice"));
    }

    #[tokio::test]
    async fn test_member_who_left_gets_nothing() {
        let h = harness("alice,pw\nbob,pw\n").await;
        h.groups.create("g1", "team").await;
        h.groups.join("g1", "alice").await;
        h.groups.join("g1", "bob").await;
        h.groups.leave("g1", "bob").await;

        let (alice, _alice_rx) = test_session("alice");
        let (bob, mut bob_rx) = test_session("bob");
        h.registry.register(Arc::clone(&alice)).await;
        h.registry.register(bob).await;

        h.engine.group(&alice, "g1", "bob cannot hear this").await;

        // bob is still on the roster but away from the group and online,
        // so he gets neither a live copy nor a queued one
        assert!(drain_text(&mut bob_rx).is_empty());
        assert_eq!(h.mailbox.pending("bob").await, 0);
    }
}
