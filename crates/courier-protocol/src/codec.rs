//! Decoding of inbound payloads.
//!
//! Payloads are JSON text, decoded once at the transport boundary into
//! a [`Command`]. Oversized or non-JSON payloads are protocol errors;
//! how to answer them is the server's policy.

use thiserror::Error;

use crate::command::Command;

/// Default maximum inbound payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Errors that can occur while decoding an inbound payload.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds the configured size limit.
    #[error("Payload size {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),

    /// Payload is not a recognizable JSON command.
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decode an inbound payload with the default size limit.
///
/// # Errors
///
/// Returns an error if the payload is oversized or not valid JSON for
/// any command shape.
pub fn decode(raw: &[u8]) -> Result<Command, ProtocolError> {
    decode_with_limit(raw, MAX_PAYLOAD_SIZE)
}

/// Decode an inbound payload with an explicit size limit.
///
/// # Errors
///
/// Returns an error if the payload is oversized or not valid JSON for
/// any command shape.
pub fn decode_with_limit(raw: &[u8], max_size: usize) -> Result<Command, ProtocolError> {
    if raw.len() > max_size {
        return Err(ProtocolError::PayloadTooLarge(raw.len(), max_size));
    }
    Ok(serde_json::from_slice(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ChannelCommand;

    #[test]
    fn test_decode_direct_send() {
        let cmd = decode(br#"{"to": "bob", "message": "hello"}"#).unwrap();
        assert!(matches!(cmd, Command::Direct { to: Some(_), .. }));
    }

    #[test]
    fn test_decode_channel_command() {
        let cmd = decode(br#"{"action": "channelJoin", "channelId": "room1"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Channel(ChannelCommand::ChannelJoin {
                channel_id: "room1".to_string()
            })
        );
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(matches!(
            decode(b"not json at all"),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let raw = vec![b'x'; 32];
        assert!(matches!(
            decode_with_limit(&raw, 16),
            Err(ProtocolError::PayloadTooLarge(32, 16))
        ));
    }
}
