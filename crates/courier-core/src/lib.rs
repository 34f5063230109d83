//! # courier-core
//!
//! Connection registry and message routing for the courier relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionStore** - which connections belong to which users
//! - **ChannelStore** - channel membership and channel discovery
//! - **Delivery** - the push boundary to one physical connection
//! - **Router** - resolves a logical recipient (user or channel) to
//!   physical delivery targets and heals stale membership on failure
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ Inbound event│────▶│   Router    │────▶│   Delivery   │
//! └──────────────┘     └─────────────┘     └──────────────┘
//!                             │
//!                             ▼
//!              ┌───────────────────────────────┐
//!              │ ConnectionStore / ChannelStore │
//!              │     (injected keyed store)     │
//!              └───────────────────────────────┘
//! ```
//!
//! Nothing is cached in process memory: every routing operation
//! re-reads the store, so any handler instance - including a freshly
//! spawned one with no memory of prior events - routes correctly.

pub mod channel;
pub mod connection;
pub mod delivery;
pub mod router;

pub use channel::{ChannelId, ChannelInfo, ChannelMembership, ChannelStore};
pub use connection::{Connection, ConnectionId, ConnectionStore, UserId};
pub use delivery::{Delivery, DeliveryError};
pub use router::{RouteReport, Router, RouterError, RouterStats};
