//! Wire protocol: framing and command parsing
//!
//! All control traffic is length-prefixed UTF-8 text frames on a single TCP
//! connection per client. File payloads ride the same connection as an
//! 8-byte signed length followed by that many raw bytes.

pub mod command;
pub mod frame;

pub use command::{Command, FileScope};
pub use frame::{FrameReader, MAX_FRAME_SIZE};
