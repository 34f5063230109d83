//! Delivery boundary.
//!
//! The relay core never touches sockets. Pushing a payload to one
//! physical connection goes through [`Delivery`], implemented by the
//! surrounding transport layer.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Delivery failures, as the transport reports them.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient connection is permanently unreachable - the
    /// transport's 410-equivalent. The only failure kind that triggers
    /// registry self-healing.
    #[error("Recipient gone")]
    Gone,

    /// Transient or unknown send failure.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Other transport error.
    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    /// Whether this failure marks the recipient as permanently gone.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, DeliveryError::Gone)
    }
}

/// Push a payload to one physical connection.
///
/// The core invokes this once per resolved delivery target and never
/// retries: a failure is either healed (membership pruned on
/// [`DeliveryError::Gone`] during a broadcast) or logged.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver `payload` to the connection identified by
    /// `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure kind; [`DeliveryError::Gone`]
    /// must be reserved for permanent unreachability.
    async fn deliver(&self, connection_id: &str, payload: Bytes) -> Result<(), DeliveryError>;
}
