//! Server configuration.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development. Settings can come from an optional
//! JSON config file, with environment variables layered on top.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RelayError, Result};

/// Relay server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Socket address the TCP listener binds to.
    /// Env: `PARLEY_BIND_ADDR`
    /// Default: `127.0.0.1:9400`
    pub bind_addr: SocketAddr,

    /// Directory holding users.txt, groups.txt, chat logs, the audit log
    /// and the shared file store.
    /// Env: `PARLEY_DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Maximum accepted text frame payload (bytes).
    pub max_frame_size: usize,

    /// Maximum accepted file upload (bytes).
    pub max_file_size: u64,

    /// Idle read deadline per connection, in seconds. A connection that
    /// sends nothing for this long is treated as disconnected. 0 disables
    /// the deadline.
    /// Env: `PARLEY_IDLE_TIMEOUT_SECS`
    pub idle_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9400".parse().unwrap(),
            data_dir: PathBuf::from("./data"),
            max_frame_size: 64 * 1024,
            max_file_size: 256 * 1024 * 1024,
            idle_timeout_secs: 300,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a JSON file. Missing keys fall back to
    /// defaults; a missing file is an error (the caller chose the path).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config: RelayConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply environment-variable overrides, falling back to the current
    /// values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(addr) = std::env::var("PARLEY_BIND_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => self.bind_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid PARLEY_BIND_ADDR, keeping current"),
            }
        }

        if let Ok(dir) = std::env::var("PARLEY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(val) = std::env::var("PARLEY_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                self.idle_timeout_secs = n;
            }
        }

        self
    }

    /// Path of the read-only credential table.
    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.txt")
    }

    /// Path of the durable group roster file.
    pub fn groups_file(&self) -> PathBuf {
        self.data_dir.join("groups.txt")
    }

    /// Path of the append-only login/logout audit log.
    pub fn event_log_file(&self) -> PathBuf {
        self.data_dir.join("log.txt")
    }

    /// Directory of per-user chat history files.
    pub fn chat_logs_dir(&self) -> PathBuf {
        self.data_dir.join("chat_logs")
    }

    /// Directory of uploaded shared files.
    pub fn shared_files_dir(&self) -> PathBuf {
        self.data_dir.join("shared_files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr.port(), 9400);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.idle_timeout_secs > 0);
    }

    #[test]
    fn test_from_file_partial_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bind_addr": "0.0.0.0:7000", "idle_timeout_secs": 30 }}"#).unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.idle_timeout_secs, 30);
        // Untouched keys keep their defaults.
        assert_eq!(config.max_frame_size, RelayConfig::default().max_frame_size);
    }

    #[test]
    fn test_from_file_missing() {
        let err = RelayConfig::from_file(Path::new("/nonexistent/parley.json")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_derived_paths() {
        let config = RelayConfig {
            data_dir: PathBuf::from("/srv/parley"),
            ..Default::default()
        };
        assert_eq!(config.users_file(), PathBuf::from("/srv/parley/users.txt"));
        assert_eq!(config.chat_logs_dir(), PathBuf::from("/srv/parley/chat_logs"));
        assert_eq!(
            config.shared_files_dir(),
            PathBuf::from("/srv/parley/shared_files")
        );
    }
}
