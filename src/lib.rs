//! TCP-based chat relay server with offline delivery
//!
//! This library provides a stateful relay server that lets many persistent
//! clients exchange text messages, join named groups, and transfer files over
//! a single framed TCP connection each. Messages addressed to users who are
//! offline are queued and replayed, together with chat history, on their next
//! login.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::RelayServer;

/// Wall-clock timestamp used for chat-log and audit-log lines.
pub fn log_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Human-readable file size for transfer notices.
pub fn format_file_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size_f = size as f64;
    if size_f < KB {
        format!("{} B", size)
    } else if size_f < MB {
        format!("{:.1} KB", size_f / KB)
    } else if size_f < GB {
        format!("{:.1} MB", size_f / MB)
    } else {
        format!("{:.1} GB", size_f / GB)
    }
}
