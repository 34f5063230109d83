//! Channel membership registry.
//!
//! A channel is a named broadcast group. Membership is a set of
//! (channel, connection) pairs; the member's user identity is
//! denormalized into each row so a broadcast can exclude the sender
//! without a join against the connection registry.
//!
//! Membership rows are advisory, not proof of liveness: a connection
//! that died without an explicit leave keeps its row until a broadcast
//! discovers the failure and prunes it.

use crate::connection::{ConnectionId, UserId};
use courier_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with('$') {
        return Err("Channel names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

fn membership_key(channel_id: &str, connection_id: &str) -> String {
    format!("member\0{}\0{}", channel_id, connection_id)
}

fn membership_prefix(channel_id: &str) -> String {
    format!("member\0{}\0", channel_id)
}

fn channel_key(channel_id: &str) -> String {
    format!("channel\0{}", channel_id)
}

/// One membership row: a connection enrolled in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMembership {
    /// The channel.
    pub channel_id: ChannelId,
    /// The member's connection.
    pub connection_id: ConnectionId,
    /// The member's user identity.
    pub user_id: UserId,
}

/// A channel record, written at creation and read for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// The channel.
    pub channel_id: ChannelId,
    /// The user who created the channel.
    pub owner_user_id: UserId,
}

/// Registry of channels and their members.
#[derive(Clone)]
pub struct ChannelStore {
    store: Arc<dyn Store>,
}

impl ChannelStore {
    /// Create a registry over the given store handle.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Write the channel record. Overwrites silently if the channel
    /// already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn create(&self, channel_id: &str, owner_user_id: &str) -> Result<(), StoreError> {
        let record = ChannelInfo {
            channel_id: channel_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
        };
        let value =
            serde_json::to_vec(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.put(&channel_key(channel_id), &value).await?;

        debug!(channel = %channel_id, owner = %owner_user_id, "Channel created");
        Ok(())
    }

    /// Enroll a connection in a channel. Idempotent upsert.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn add_member(
        &self,
        channel_id: &str,
        connection_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let row = ChannelMembership {
            channel_id: channel_id.to_string(),
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
        };
        let value =
            serde_json::to_vec(&row).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store
            .put(&membership_key(channel_id, connection_id), &value)
            .await?;

        debug!(channel = %channel_id, connection = %connection_id, user = %user_id, "Member added");
        Ok(())
    }

    /// Remove a membership row. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn remove_member(
        &self,
        channel_id: &str,
        connection_id: &str,
    ) -> Result<(), StoreError> {
        self.store
            .delete(&membership_key(channel_id, connection_id))
            .await?;

        debug!(channel = %channel_id, connection = %connection_id, "Member removed");
        Ok(())
    }

    /// All membership rows of a channel, resolved with one prefix scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn list_members(&self, channel_id: &str) -> Result<Vec<ChannelMembership>, StoreError> {
        self.store
            .scan_prefix(&membership_prefix(channel_id))
            .await?
            .iter()
            .map(|(_, raw)| {
                serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Delete a channel record and every membership row under it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn remove(&self, channel_id: &str) -> Result<(), StoreError> {
        for (key, _) in self.store.scan_prefix(&membership_prefix(channel_id)).await? {
            self.store.delete(&key).await?;
        }
        self.store.delete(&channel_key(channel_id)).await?;

        debug!(channel = %channel_id, "Channel removed");
        Ok(())
    }

    /// All channel records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, StoreError> {
        self.store
            .scan_prefix("channel\0")
            .await?
            .iter()
            .map(|(_, raw)| {
                serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Number of channel records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn count_channels(&self) -> Result<usize, StoreError> {
        Ok(self.store.scan_prefix("channel\0").await?.len())
    }

    /// Number of membership rows across all channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn count_members(&self) -> Result<usize, StoreError> {
        Ok(self.store.scan_prefix("member\0").await?.len())
    }
}
