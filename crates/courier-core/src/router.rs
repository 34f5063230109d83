//! Message routing for the courier relay.
//!
//! The router resolves a logical recipient - a user identity or a
//! channel - into a set of physical connections, invokes the delivery
//! boundary for each, and heals the registry when a broadcast runs
//! into a connection that is permanently gone.

use crate::channel::{validate_channel_name, ChannelInfo, ChannelStore};
use crate::connection::ConnectionStore;
use crate::delivery::Delivery;
use bytes::Bytes;
use courier_store::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Router errors.
///
/// Delivery failures are routing policy, not errors: they surface in
/// the [`RouteReport`], never here.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// The underlying store failed; the current event is abandoned.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one routing operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Payload deliveries that succeeded.
    pub delivered: usize,
    /// Deliveries that failed without consequence for the registry.
    pub failed: usize,
    /// Membership rows pruned after a gone recipient.
    pub pruned: usize,
    /// Diagnostic messages sent back to the sender.
    pub diagnostics: usize,
}

/// The routing engine.
///
/// Stateless between invocations: both registries re-read the injected
/// store on every operation, so concurrent handler instances need no
/// coordination beyond the store itself.
pub struct Router {
    connections: ConnectionStore,
    channels: ChannelStore,
    delivery: Arc<dyn Delivery>,
}

impl Router {
    /// Create a router over a store handle and a delivery transport.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, delivery: Arc<dyn Delivery>) -> Self {
        Self {
            connections: ConnectionStore::new(store.clone()),
            channels: ChannelStore::new(store),
            delivery,
        }
    }

    /// Record a new live connection for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn connect(&self, connection_id: &str, user_id: &str) -> Result<(), RouterError> {
        self.connections.put(connection_id, user_id).await?;
        info!(connection = %connection_id, user = %user_id, "Connected");
        Ok(())
    }

    /// Remove a connection record. Membership rows are left in place;
    /// a later broadcast heals them when delivery fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn disconnect(&self, connection_id: &str) -> Result<(), RouterError> {
        self.connections.delete(connection_id).await?;
        info!(connection = %connection_id, "Disconnected");
        Ok(())
    }

    /// Deliver `payload` to every live connection of `recipient`.
    ///
    /// A missing or unknown recipient is answered with a diagnostic to
    /// the sender's own connection. Individual delivery failures are
    /// logged and never prune the connection registry - direct-routing
    /// staleness heals only through an explicit disconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn route_to_user(
        &self,
        recipient: Option<&str>,
        payload: Bytes,
        sender_connection_id: &str,
    ) -> Result<RouteReport, RouterError> {
        let mut report = RouteReport::default();

        let Some(recipient) = recipient else {
            debug!(sender = %sender_connection_id, "Direct send without recipient");
            self.deliver_diagnostic(sender_connection_id, "Cannot resolve recipient")
                .await;
            report.diagnostics += 1;
            return Ok(report);
        };

        let targets = self.connections.find_by_user(recipient).await?;
        if targets.is_empty() {
            debug!(user = %recipient, sender = %sender_connection_id, "No connection found");
            self.deliver_diagnostic(
                sender_connection_id,
                &format!("No connection found for user {}", recipient),
            )
            .await;
            report.diagnostics += 1;
            return Ok(report);
        }

        for target in &targets {
            match self
                .delivery
                .deliver(&target.connection_id, payload.clone())
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        connection = %target.connection_id,
                        user = %recipient,
                        error = %e,
                        "Direct delivery failed"
                    );
                }
            }
        }

        trace!(
            user = %recipient,
            delivered = report.delivered,
            targets = targets.len(),
            "Direct fan-out complete"
        );
        Ok(report)
    }

    /// Broadcast `payload` to every member of `channel_id` except the
    /// sender's own connections.
    ///
    /// A member whose delivery fails with "recipient gone" has its
    /// membership row pruned immediately; the fan-out continues. Any
    /// other failure is logged and the member keeps its row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn route_to_channel(
        &self,
        channel_id: &str,
        payload: Bytes,
        sender_connection_id: &str,
        sender_user_id: &str,
    ) -> Result<RouteReport, RouterError> {
        let mut report = RouteReport::default();

        let members = self.channels.list_members(channel_id).await?;
        if members.is_empty() {
            debug!(channel = %channel_id, sender = %sender_connection_id, "Broadcast to empty channel");
            self.deliver_diagnostic(
                sender_connection_id,
                &format!("No members in channel {}", channel_id),
            )
            .await;
            report.diagnostics += 1;
            return Ok(report);
        }

        for member in &members {
            // Senders never receive their own broadcast, even across
            // multiple connections under the same channel.
            if member.user_id == sender_user_id {
                continue;
            }

            match self
                .delivery
                .deliver(&member.connection_id, payload.clone())
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_gone() => {
                    debug!(
                        channel = %channel_id,
                        connection = %member.connection_id,
                        "Pruning membership of gone connection"
                    );
                    self.channels
                        .remove_member(channel_id, &member.connection_id)
                        .await?;
                    report.pruned += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        channel = %channel_id,
                        connection = %member.connection_id,
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }

        trace!(
            channel = %channel_id,
            delivered = report.delivered,
            pruned = report.pruned,
            members = members.len(),
            "Broadcast fan-out complete"
        );
        Ok(report)
    }

    /// Create a channel and enroll the creator as its first member.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid or the store is
    /// unavailable.
    pub async fn create_channel(
        &self,
        channel_id: &str,
        connection_id: &str,
        user_id: &str,
    ) -> Result<(), RouterError> {
        validate_channel_name(channel_id).map_err(RouterError::InvalidChannel)?;

        self.channels.create(channel_id, user_id).await?;
        self.channels
            .add_member(channel_id, connection_id, user_id)
            .await?;

        info!(channel = %channel_id, user = %user_id, "Channel created");
        Ok(())
    }

    /// Enroll a connection in a channel. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid or the store is
    /// unavailable.
    pub async fn join_channel(
        &self,
        channel_id: &str,
        connection_id: &str,
        user_id: &str,
    ) -> Result<(), RouterError> {
        validate_channel_name(channel_id).map_err(RouterError::InvalidChannel)?;

        self.channels
            .add_member(channel_id, connection_id, user_id)
            .await?;

        debug!(channel = %channel_id, connection = %connection_id, "Joined channel");
        Ok(())
    }

    /// Remove a connection from a channel. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn leave_channel(
        &self,
        channel_id: &str,
        connection_id: &str,
    ) -> Result<(), RouterError> {
        self.channels.remove_member(channel_id, connection_id).await?;

        debug!(channel = %channel_id, connection = %connection_id, "Left channel");
        Ok(())
    }

    /// All channel records, for discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, RouterError> {
        Ok(self.channels.list_channels().await?)
    }

    /// Registry counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn stats(&self) -> Result<RouterStats, RouterError> {
        Ok(RouterStats {
            connection_count: self.connections.count().await?,
            channel_count: self.channels.count_channels().await?,
            membership_count: self.channels.count_members().await?,
        })
    }

    /// Send a routing diagnostic back to the sender. The sender is
    /// always informed of routing failure; a failure to inform them is
    /// only logged.
    async fn deliver_diagnostic(&self, sender_connection_id: &str, text: &str) {
        if let Err(e) = self
            .delivery
            .deliver(sender_connection_id, Bytes::from(text.to_string()))
            .await
        {
            warn!(connection = %sender_connection_id, error = %e, "Diagnostic delivery failed");
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Live connection records.
    pub connection_count: usize,
    /// Channel records.
    pub channel_count: usize,
    /// Membership rows across all channels.
    pub membership_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryError;
    use async_trait::async_trait;
    use courier_store::MemoryStore;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Delivery double that records payloads and simulates failures.
    #[derive(Default)]
    struct RecordingDelivery {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        gone: Mutex<HashSet<String>>,
        flaky: Mutex<HashSet<String>>,
    }

    impl RecordingDelivery {
        fn mark_gone(&self, connection_id: &str) {
            self.gone.lock().unwrap().insert(connection_id.to_string());
        }

        fn mark_flaky(&self, connection_id: &str) {
            self.flaky.lock().unwrap().insert(connection_id.to_string());
        }

        fn sent_to(&self, connection_id: &str) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == connection_id)
                .map(|(_, payload)| payload.clone())
                .collect()
        }

        fn total_sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn deliver(&self, connection_id: &str, payload: Bytes) -> Result<(), DeliveryError> {
            if self.gone.lock().unwrap().contains(connection_id) {
                return Err(DeliveryError::Gone);
            }
            if self.flaky.lock().unwrap().contains(connection_id) {
                return Err(DeliveryError::SendFailed("simulated failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((connection_id.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn setup() -> (Router, Arc<RecordingDelivery>) {
        let delivery = Arc::new(RecordingDelivery::default());
        let router = Router::new(Arc::new(MemoryStore::new()), delivery.clone());
        (router, delivery)
    }

    #[tokio::test]
    async fn test_direct_route_fans_out_to_all_user_connections() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("alice-2", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();

        let report = router
            .route_to_user(Some("alice"), Bytes::from_static(b"hi"), "bob-1")
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(delivery.sent_to("alice-1"), vec![b"hi".to_vec()]);
        assert_eq!(delivery.sent_to("alice-2"), vec![b"hi".to_vec()]);
        assert!(delivery.sent_to("bob-1").is_empty());
    }

    #[tokio::test]
    async fn test_direct_route_unknown_user_informs_sender_only() {
        let (router, delivery) = setup();

        router.connect("bob-1", "bob").await.unwrap();

        let report = router
            .route_to_user(Some("nobody"), Bytes::from_static(b"hi"), "bob-1")
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.diagnostics, 1);
        assert_eq!(
            delivery.sent_to("bob-1"),
            vec![b"No connection found for user nobody".to_vec()]
        );
        assert_eq!(delivery.total_sent(), 1);
    }

    #[tokio::test]
    async fn test_direct_route_missing_recipient_informs_sender() {
        let (router, delivery) = setup();

        router.connect("bob-1", "bob").await.unwrap();

        let report = router
            .route_to_user(None, Bytes::from_static(b"hi"), "bob-1")
            .await
            .unwrap();

        assert_eq!(report.diagnostics, 1);
        assert_eq!(
            delivery.sent_to("bob-1"),
            vec![b"Cannot resolve recipient".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_direct_route_partial_failure_isolation() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("alice-2", "alice").await.unwrap();
        router.connect("alice-3", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();
        delivery.mark_flaky("alice-2");

        let report = router
            .route_to_user(Some("alice"), Bytes::from_static(b"hi"), "bob-1")
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(delivery.sent_to("alice-1"), vec![b"hi".to_vec()]);
        assert_eq!(delivery.sent_to("alice-3"), vec![b"hi".to_vec()]);

        // Direct routing never prunes the connection registry.
        let stats = router.stats().await.unwrap();
        assert_eq!(stats.connection_count, 4);
    }

    #[tokio::test]
    async fn test_double_disconnect_is_idempotent() {
        let (router, _delivery) = setup();

        router.connect("conn-1", "alice").await.unwrap();
        router.disconnect("conn-1").await.unwrap();
        router.disconnect("conn-1").await.unwrap();

        assert_eq!(router.stats().await.unwrap().connection_count, 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_all_sender_connections() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("alice-2", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();
        router.connect("carol-1", "carol").await.unwrap();

        router.create_channel("room1", "alice-1", "alice").await.unwrap();
        router.join_channel("room1", "alice-2", "alice").await.unwrap();
        router.join_channel("room1", "bob-1", "bob").await.unwrap();
        router.join_channel("room1", "carol-1", "carol").await.unwrap();

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hello"), "alice-1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(delivery.sent_to("bob-1"), vec![b"hello".to_vec()]);
        assert_eq!(delivery.sent_to("carol-1"), vec![b"hello".to_vec()]);
        // Neither of the sender's connections hears the broadcast.
        assert!(delivery.sent_to("alice-1").is_empty());
        assert!(delivery.sent_to("alice-2").is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_prunes_gone_member_and_continues() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();
        router.connect("carol-1", "carol").await.unwrap();

        router.create_channel("room1", "alice-1", "alice").await.unwrap();
        router.join_channel("room1", "bob-1", "bob").await.unwrap();
        router.join_channel("room1", "carol-1", "carol").await.unwrap();

        delivery.mark_gone("bob-1");

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hello"), "alice-1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(delivery.sent_to("carol-1"), vec![b"hello".to_vec()]);

        // The stale row is gone, the live rows are untouched.
        let members = router.channels.list_members("room1").await.unwrap();
        let ids: Vec<_> = members.iter().map(|m| m.connection_id.as_str()).collect();
        assert!(!ids.contains(&"bob-1"));
        assert!(ids.contains(&"alice-1"));
        assert!(ids.contains(&"carol-1"));

        // Pruning is scoped to channel membership: bob's connection
        // record survives until an explicit disconnect.
        assert!(router.connections.get("bob-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_broadcast_transient_failure_keeps_membership() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();
        router.connect("carol-1", "carol").await.unwrap();

        router.create_channel("room1", "alice-1", "alice").await.unwrap();
        router.join_channel("room1", "bob-1", "bob").await.unwrap();
        router.join_channel("room1", "carol-1", "carol").await.unwrap();

        delivery.mark_flaky("bob-1");

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hello"), "alice-1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pruned, 0);

        // A transient failure must not cost a live member its row.
        let members = router.channels.list_members("room1").await.unwrap();
        assert!(members.iter().any(|m| m.connection_id == "bob-1"));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_channel_informs_sender() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hello"), "alice-1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.diagnostics, 1);
        assert_eq!(
            delivery.sent_to("alice-1"),
            vec![b"No members in channel room1".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_channel_scenario_end_to_end() {
        let (router, delivery) = setup();

        router.connect("conn1", "alice").await.unwrap();
        router.connect("conn2", "bob").await.unwrap();
        router.create_channel("room1", "conn1", "alice").await.unwrap();
        router.join_channel("room1", "conn2", "bob").await.unwrap();

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hi"), "conn1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(delivery.sent_to("conn2"), vec![b"hi".to_vec()]);
        assert!(delivery.sent_to("conn1").is_empty());
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let (router, _delivery) = setup();

        router.connect("conn-1", "alice").await.unwrap();
        router.join_channel("room1", "conn-1", "alice").await.unwrap();
        router.join_channel("room1", "conn-1", "alice").await.unwrap();

        assert_eq!(router.stats().await.unwrap().membership_count, 1);
    }

    #[tokio::test]
    async fn test_create_channel_rejects_invalid_name() {
        let (router, _delivery) = setup();

        assert!(matches!(
            router.create_channel("", "conn-1", "alice").await,
            Err(RouterError::InvalidChannel(_))
        ));
        assert!(matches!(
            router.create_channel("$system", "conn-1", "alice").await,
            Err(RouterError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_channel() {
        let (router, delivery) = setup();

        router.connect("alice-1", "alice").await.unwrap();
        router.connect("bob-1", "bob").await.unwrap();
        router.create_channel("room1", "alice-1", "alice").await.unwrap();
        router.join_channel("room1", "bob-1", "bob").await.unwrap();
        router.leave_channel("room1", "bob-1").await.unwrap();

        let report = router
            .route_to_channel("room1", Bytes::from_static(b"hello"), "alice-1", "alice")
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert!(delivery.sent_to("bob-1").is_empty());

        // Leaving twice is fine.
        router.leave_channel("room1", "bob-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_channel_listing() {
        let (router, _delivery) = setup();

        router.connect("conn-1", "alice").await.unwrap();
        router.connect("conn-2", "bob").await.unwrap();
        router.create_channel("room1", "conn-1", "alice").await.unwrap();
        router.create_channel("room2", "conn-2", "bob").await.unwrap();
        router.join_channel("room1", "conn-2", "bob").await.unwrap();

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.membership_count, 3);

        let channels = router.list_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().any(|c| c.channel_id == "room1"));
    }
}
