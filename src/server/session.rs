//! Live session state and the per-connection writer task
//!
//! A connection's socket write half is owned by exactly one writer task fed
//! by an unbounded outbound queue. The owning dispatcher and foreign
//! delivery fan-outs all push into the queue, so frames from concurrent
//! senders can never interleave on the wire, and a slow recipient only backs
//! up its own queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::frame;

/// One queued item for a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Length-prefixed text frame.
    Text(String),
    /// Raw file payload: 8-byte signed length then the bytes.
    Blob(Bytes),
    /// Download "not found" sentinel (-1 length).
    NotFound,
    /// Flush pending output and close the connection.
    Close,
}

/// One authenticated, live connection bound to a username.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    username: String,
    alias: String,
    anonymous: AtomicBool,
    remote_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    pub fn new(
        username: String,
        remote_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let alias = format!("anon-{:04}", rand::thread_rng().gen_range(0..10_000));
        Self {
            id: Uuid::new_v4(),
            username,
            alias,
            anonymous: AtomicBool::new(false),
            remote_addr,
            outbound,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The name shown on outgoing messages: the random alias while the
    /// session is in anonymous mode, the real username otherwise.
    pub fn display_name(&self) -> &str {
        if self.is_anonymous() {
            &self.alias
        } else {
            &self.username
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous.load(Ordering::Relaxed)
    }

    /// Flip anonymous mode and return the new state.
    pub fn toggle_anonymous(&self) -> bool {
        !self.anonymous.fetch_xor(true, Ordering::Relaxed)
    }

    /// Queue a text frame. A send to a session whose writer already died is
    /// silently dropped; the dead connection cleans itself up.
    pub fn send(&self, line: impl Into<String>) {
        let _ = self.outbound.send(Outbound::Text(line.into()));
    }

    /// Queue a raw file payload.
    pub fn send_blob(&self, data: Bytes) {
        let _ = self.outbound.send(Outbound::Blob(data));
    }

    /// Queue the download not-found sentinel.
    pub fn send_not_found(&self) {
        let _ = self.outbound.send(Outbound::NotFound);
    }

    /// Ask the writer task to close the connection.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Drain a session's outbound queue into the socket write half.
///
/// Runs until the queue closes, a `Close` item arrives, or a write fails.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
) {
    use tokio::io::AsyncWriteExt;

    while let Some(item) = rx.recv().await {
        let result = match item {
            Outbound::Text(line) => frame::write_frame(&mut writer, &line).await,
            Outbound::Blob(data) => frame::write_blob(&mut writer, &data).await,
            Outbound::NotFound => frame::write_not_found(&mut writer).await,
            Outbound::Close => {
                let _ = writer.shutdown().await;
                break;
            }
        };
        if let Err(e) = result {
            debug!("Writer stopped: {}", e);
            break;
        }
    }
}
