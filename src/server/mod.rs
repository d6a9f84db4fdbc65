//! Server-side relay implementation
//!
//! The server is a set of shared stores (sessions, groups, mailboxes,
//! durable logs) behind `Arc`, a delivery engine that routes messages
//! through them, and one dispatcher task per accepted connection.

pub mod delivery;
pub mod dispatcher;
pub mod files;
pub mod groups;
pub mod mailbox;
pub mod registry;
pub mod relay_server;
pub mod session;
pub mod store;

pub use delivery::DeliveryEngine;
pub use files::FileRelay;
pub use groups::{ChatGroup, GroupStore};
pub use mailbox::{OfflineMailbox, UNREAD_MARKER};
pub use registry::SessionRegistry;
pub use relay_server::RelayServer;
pub use session::{Outbound, Session};
pub use store::{ChatLog, EventLog, UserDirectory};
