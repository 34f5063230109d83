//! # courier-protocol
//!
//! Wire command definitions for the courier relay.
//!
//! Clients speak JSON text over their persistent connection. Each
//! payload decodes into exactly one [`Command`]:
//!
//! - `{"to": "<user>", "message": "..."}` - direct send, fanned out to
//!   every live connection of the addressed user
//! - `{"action": "channelCreate" | "channelJoin" | "channelLeave" |
//!   "sendMessageChannel", "channelId": "...", "message": "..."}` -
//!   channel lifecycle and broadcast
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{decode, Command};
//!
//! let cmd = decode(br#"{"to": "alice", "message": "hi"}"#).unwrap();
//! assert!(matches!(cmd, Command::Direct { .. }));
//! ```

pub mod codec;
pub mod command;

pub use codec::{decode, decode_with_limit, ProtocolError, MAX_PAYLOAD_SIZE};
pub use command::{ChannelCommand, Command};
