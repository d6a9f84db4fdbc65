//! Group store: durable group definitions and two-tier membership
//!
//! Each group keeps a single roster map tagged with per-member presence.
//! The permanent roster only grows — leaving a group or disconnecting clears
//! the presence flag but never removes the name — so the invariant
//! `present ⊆ roster` holds by construction.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;

/// Presence tag for one roster entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberState {
    pub online: bool,
}

/// A named chat group with its permanent roster.
#[derive(Debug, Clone)]
pub struct ChatGroup {
    pub id: String,
    pub name: String,
    members: HashMap<String, MemberState>,
}

impl ChatGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Permanent roster size.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the username is on the permanent roster, online or not.
    pub fn is_member(&self, username: &str) -> bool {
        self.members.contains_key(username)
    }

    /// Whether the username is currently present in the group.
    pub fn is_present(&self, username: &str) -> bool {
        self.members.get(username).map(|m| m.online).unwrap_or(false)
    }

    /// Add to the roster and mark present. Idempotent.
    pub fn add_member(&mut self, username: &str) {
        self.members
            .entry(username.to_string())
            .or_default()
            .online = true;
    }

    /// Flip the presence flag. Returns false if the user is not a member.
    pub fn set_online(&mut self, username: &str, online: bool) -> bool {
        match self.members.get_mut(username) {
            Some(state) => {
                state.online = online;
                true
            }
            None => false,
        }
    }

    /// Usernames currently present, sorted.
    pub fn present_members(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .iter()
            .filter(|(_, state)| state.online)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The full permanent roster, sorted.
    pub fn roster(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.keys().cloned().collect();
        names.sort();
        names
    }

    /// Serialize as one roster-file line: `id,name,member;member;...`
    pub fn to_file_string(&self) -> String {
        format!("{},{},{}", self.id, self.name, self.roster().join(";"))
    }

    /// Parse one roster-file line. Members load as offline.
    pub fn from_file_string(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 2 || parts[0].is_empty() {
            return None;
        }
        let mut group = ChatGroup::new(parts[0], parts[1]);
        if let Some(members) = parts.get(2) {
            for member in members.split(';') {
                if !member.is_empty() {
                    group.members.insert(member.to_string(), MemberState::default());
                }
            }
        }
        Some(group)
    }
}

/// Shared store of all groups, persisted to a line-oriented roster file
/// immediately after any roster mutation.
#[derive(Debug)]
pub struct GroupStore {
    path: PathBuf,
    groups: RwLock<HashMap<String, ChatGroup>>,
}

impl GroupStore {
    /// Load groups from the roster file. When the file does not exist yet, a
    /// `default` group is created and persisted.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let mut groups = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                for line in raw.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match ChatGroup::from_file_string(line) {
                        Some(group) => {
                            info!(
                                "Loaded group {} ({}) with {} members",
                                group.id,
                                group.name,
                                group.member_count()
                            );
                            groups.insert(group.id.clone(), group);
                        }
                        None => warn!("Skipping malformed roster line: {}", line),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No roster file, creating default group");
                let group = ChatGroup::new("default", "General");
                groups.insert(group.id.clone(), group);
            }
            Err(e) => return Err(e.into()),
        }

        let store = Self {
            path,
            groups: RwLock::new(groups),
        };
        store.save().await;
        Ok(store)
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn in_memory(dir: &std::path::Path) -> Self {
        Self {
            path: dir.join("groups.txt"),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Create a group. Returns false when the id is already taken.
    pub async fn create(&self, id: &str, name: &str) -> bool {
        {
            let mut groups = self.groups.write().await;
            if groups.contains_key(id) {
                return false;
            }
            groups.insert(id.to_string(), ChatGroup::new(id, name));
        }
        self.save().await;
        true
    }

    /// Add a user to a group's roster and presence set. Idempotent.
    /// Returns false when the group does not exist.
    pub async fn join(&self, id: &str, username: &str) -> bool {
        {
            let mut groups = self.groups.write().await;
            match groups.get_mut(id) {
                Some(group) => group.add_member(username),
                None => return false,
            }
        }
        self.save().await;
        true
    }

    /// Clear a user's presence in a group; the roster entry is retained.
    /// Returns false when the group does not exist or the user was not
    /// present in it.
    pub async fn leave(&self, id: &str, username: &str) -> bool {
        {
            let mut groups = self.groups.write().await;
            match groups.get_mut(id) {
                Some(group) if group.is_present(username) => {
                    group.set_online(username, false);
                }
                _ => return false,
            }
        }
        self.save().await;
        true
    }

    /// Flip presence for a user across every group whose roster has them,
    /// on login and disconnect. Presence is not persisted.
    pub async fn set_online_all(&self, username: &str, online: bool) {
        let mut groups = self.groups.write().await;
        for group in groups.values_mut() {
            group.set_online(username, online);
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.groups.read().await.contains_key(id)
    }

    pub async fn is_member(&self, id: &str, username: &str) -> bool {
        self.groups
            .read()
            .await
            .get(id)
            .map(|g| g.is_member(username))
            .unwrap_or(false)
    }

    pub async fn name_of(&self, id: &str) -> Option<String> {
        self.groups.read().await.get(id).map(|g| g.name.clone())
    }

    pub async fn present_members(&self, id: &str) -> Vec<String> {
        self.groups
            .read()
            .await
            .get(id)
            .map(|g| g.present_members())
            .unwrap_or_default()
    }

    pub async fn roster(&self, id: &str) -> Vec<String> {
        self.groups
            .read()
            .await
            .get(id)
            .map(|g| g.roster())
            .unwrap_or_default()
    }

    /// Render the group list reply: id, name, roster size, and a per-member
    /// online/offline annotation.
    pub async fn render_list(&self) -> String {
        let groups = self.groups.read().await;
        let mut ids: Vec<&String> = groups.keys().collect();
        ids.sort();

        let mut out = String::from("available groups:");
        for id in ids {
            let group = &groups[id];
            let members: Vec<String> = group
                .roster()
                .into_iter()
                .map(|name| {
                    let tag = if group.is_present(&name) { "online" } else { "offline" };
                    format!("{}[{}]", name, tag)
                })
                .collect();
            out.push_str(&format!(
                "\n{} - {} ({} members: {})",
                group.id,
                group.name,
                group.member_count(),
                members.join(" ")
            ));
        }
        out
    }

    /// Rewrite the roster file. Persistence failures are logged, not
    /// propagated: a disk hiccup must not kill the mutating connection.
    async fn save(&self) {
        let contents = {
            let groups = self.groups.read().await;
            let mut ids: Vec<&String> = groups.keys().collect();
            ids.sort();
            let mut out = String::new();
            for id in ids {
                out.push_str(&groups[id].to_file_string());
                out.push('\n');
            }
            out
        };

        if let Err(e) = tokio::fs::write(&self.path, contents).await {
            warn!("Failed to save roster file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_string_roundtrip() {
        let mut group = ChatGroup::new("g1", "Study Group");
        group.add_member("alice");
        group.add_member("bob");

        let restored = ChatGroup::from_file_string(&group.to_file_string()).unwrap();
        assert_eq!(restored.id, "g1");
        assert_eq!(restored.name, "Study Group");
        assert_eq!(restored.roster(), group.roster());
        // Presence is not durable: everyone loads as offline.
        assert!(restored.present_members().is_empty());
    }

    #[test]
    fn test_from_file_string_rejects_garbage() {
        assert!(ChatGroup::from_file_string("").is_none());
        assert!(ChatGroup::from_file_string("lonely").is_none());
        assert!(ChatGroup::from_file_string(",name,a;b").is_none());

        // A group without members is fine.
        let group = ChatGroup::from_file_string("g1,Empty").unwrap();
        assert_eq!(group.member_count(), 0);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::in_memory(dir.path());
        store.create("g1", "Study").await;

        assert!(store.join("g1", "alice").await);
        assert!(store.join("g1", "alice").await);

        assert_eq!(store.roster("g1").await, vec!["alice"]);
        assert_eq!(store.present_members("g1").await, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_leave_keeps_roster_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::in_memory(dir.path());
        store.create("g1", "Study").await;
        store.join("g1", "alice").await;

        assert!(store.leave("g1", "alice").await);
        assert!(store.is_member("g1", "alice").await);
        assert!(store.present_members("g1").await.is_empty());

        // Leaving twice fails, as does leaving a missing group.
        assert!(!store.leave("g1", "alice").await);
        assert!(!store.leave("nope", "alice").await);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::in_memory(dir.path());
        assert!(store.create("g1", "Study").await);
        assert!(!store.create("g1", "Other").await);
        assert_eq!(store.name_of("g1").await.unwrap(), "Study");
    }

    #[tokio::test]
    async fn test_set_online_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::in_memory(dir.path());
        store.create("g1", "Study").await;
        store.create("g2", "Games").await;
        store.join("g1", "alice").await;
        store.join("g2", "alice").await;

        store.set_online_all("alice", false).await;
        assert!(store.present_members("g1").await.is_empty());
        assert!(store.present_members("g2").await.is_empty());

        store.set_online_all("alice", true).await;
        assert_eq!(store.present_members("g1").await, vec!["alice"]);
        assert_eq!(store.present_members("g2").await, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.txt");

        {
            let store = GroupStore::load(path.clone()).await.unwrap();
            store.create("g1", "Study").await;
            store.join("g1", "alice").await;
            store.join("g1", "bob").await;
        }

        let reloaded = GroupStore::load(path).await.unwrap();
        assert!(reloaded.contains("g1").await);
        assert!(reloaded.contains("default").await);
        assert_eq!(reloaded.roster("g1").await, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_render_list_annotates_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupStore::in_memory(dir.path());
        store.create("g1", "Study").await;
        store.join("g1", "alice").await;
        store.join("g1", "bob").await;
        store.leave("g1", "bob").await;

        let listing = store.render_list().await;
        assert!(listing.contains("g1 - Study (2 members:"));
        assert!(listing.contains("alice[online]"));
        assert!(listing.contains("bob[offline]"));
    }
}
