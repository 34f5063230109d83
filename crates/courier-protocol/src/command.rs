//! Inbound command types.
//!
//! Clients send JSON text payloads. A payload carrying an `action`
//! field is a channel operation; any other object is a direct send
//! addressed by user identity. A direct send with no recipient is
//! still represented (`to: None`) - answering it with a diagnostic is
//! routing policy, not a parse error.

use serde::Deserialize;

/// A decoded client command.
///
/// Decoding happens once at the transport boundary; the router only
/// ever sees these variants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Channel lifecycle or broadcast operation.
    Channel(ChannelCommand),

    /// Direct send to a user identity.
    Direct {
        /// Recipient user identity. Absent in malformed requests.
        #[serde(default)]
        to: Option<String>,
        /// Message body.
        #[serde(default)]
        message: Option<String>,
    },
}

/// Channel operations, dispatched on the `action` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ChannelCommand {
    /// Create a channel; the creator becomes its first member.
    #[serde(rename_all = "camelCase")]
    ChannelCreate {
        /// Channel to create.
        channel_id: String,
    },

    /// Join an existing (or not-yet-existing) channel.
    #[serde(rename_all = "camelCase")]
    ChannelJoin {
        /// Channel to join.
        channel_id: String,
    },

    /// Leave a channel.
    #[serde(rename_all = "camelCase")]
    ChannelLeave {
        /// Channel to leave.
        channel_id: String,
    },

    /// Broadcast a message to every member of a channel.
    #[serde(rename_all = "camelCase")]
    SendMessageChannel {
        /// Target channel.
        channel_id: String,
        /// Message body.
        #[serde(default)]
        message: Option<String>,
    },
}
