//! Hyperliquid real-time streaming
//!
//! One physical WebSocket multiplexes every logical subscription:
//! - [`ConnectionSupervisor`] keeps the channel alive and replays subscriptions
//! - [`SubscriptionRegistry`] is the source of truth for what is subscribed
//! - [`MessageRouter`] fans inbound messages out to callbacks and the poll queue
//! - [`HyperliquidStreams`] is the public facade, [`StreamCommands`] its JSON surface

pub mod commands;
pub mod config;
pub mod connection;
pub mod registry;
pub mod router;
pub mod streams;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use commands::{AppContext, StreamCommands};
pub use config::{HyperliquidConfig, Network, ReconnectConfig};
pub use connection::{ConnectionHealth, ConnectionState, ConnectionStats, ConnectionSupervisor, SupervisorHandle};
pub use registry::{Registration, SubscriptionRegistry};
pub use router::MessageRouter;
pub use streams::HyperliquidStreams;
pub use types::*;
