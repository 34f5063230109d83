//! In-process delivery transport.
//!
//! Each live WebSocket registers an outbound sender under its
//! connection identity. Delivering to an identity with no entry, or
//! whose socket task has hung up, is the "recipient gone" signal that
//! drives registry self-healing.

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{Delivery, DeliveryError};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Delivery transport backed by per-socket outbound queues.
#[derive(Default)]
pub struct LocalDelivery {
    senders: DashMap<String, mpsc::UnboundedSender<Bytes>>,
}

impl LocalDelivery {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back its outbound queue.
    pub fn register(&self, connection_id: &str) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(connection_id.to_string(), tx);
        debug!(connection = %connection_id, "Delivery target registered");
        rx
    }

    /// Drop a connection's outbound queue.
    pub fn unregister(&self, connection_id: &str) {
        self.senders.remove(connection_id);
        debug!(connection = %connection_id, "Delivery target unregistered");
    }

    /// Number of registered delivery targets.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.senders.len()
    }
}

#[async_trait]
impl Delivery for LocalDelivery {
    async fn deliver(&self, connection_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
        let Some(sender) = self.senders.get(connection_id) else {
            return Err(DeliveryError::Gone);
        };
        // A closed queue means the socket task ended without
        // unregistering, which is the same permanent signal.
        sender.send(payload).map_err(|_| DeliveryError::Gone)
    }
}
