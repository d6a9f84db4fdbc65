//! Durable state: credential table, per-user chat logs, audit log
//!
//! The credential table is loaded once at startup and read-only afterwards.
//! Chat logs are append-only per-user files replayed in full on each login.
//! Log append failures are logged and swallowed: losing one history line
//! must not take a connection down.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{RelayError, Result};
use crate::log_timestamp;

/// Read-only username -> password lookup loaded from `users.txt`
/// (one `username,password` per line).
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, String>,
}

impl UserDirectory {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            RelayError::config(format!("cannot read user table {}: {}", path.display(), e))
        })?;

        let mut users = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(',') {
                Some((username, password)) if !username.is_empty() => {
                    users.insert(username.to_string(), password.to_string());
                }
                _ => warn!("Skipping malformed user table line: {}", line),
            }
        }
        Ok(Self { users })
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map(|p| p == password).unwrap_or(false)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// All registered usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Append-only per-user chat history, one file per username.
#[derive(Debug)]
pub struct ChatLog {
    dir: PathBuf,
}

impl ChatLog {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn file_for(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{}_chat.txt", username))
    }

    /// Append one timestamped line to a user's history.
    pub async fn append(&self, username: &str, line: &str) {
        let path = self.file_for(username);
        let entry = format!("{} {}\n", log_timestamp(), line);
        if let Err(e) = append_line(&path, &entry).await {
            warn!("Failed to append chat log for {}: {}", username, e);
        }
    }

    /// Full history for a user, earliest first. Empty if none exists.
    pub async fn replay(&self, username: &str) -> Vec<String> {
        match tokio::fs::read_to_string(self.file_for(username)).await {
            Ok(raw) => raw.lines().map(|l| l.to_string()).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read chat log for {}: {}", username, e);
                Vec::new()
            }
        }
    }
}

/// Append-only login/logout audit log.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn append(&self, line: &str) {
        let entry = format!("{} {}\n", log_timestamp(), line);
        if let Err(e) = append_line(&self.path, &entry).await {
            warn!("Failed to append event log: {}", e);
        }
    }
}

async fn append_line(path: &PathBuf, entry: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}
