//! # HyperStream Exchange Integrations
//!
//! Real-time venue streaming on a single-threaded monoio runtime.
//!
//! ## Architecture
//!
//! - **Transport seam** - `Transport`/`Channel` traits, TLS WebSocket implementation
//! - **Single-actor supervisor** - one task owns the socket, callers talk to it over flume
//! - **Registry as source of truth** - subscriptions survive reconnects and restarts
//! - **Dual delivery** - push callbacks and a pull queue fed by the same router

pub mod errors;
pub mod hyperliquid;
pub mod tls;
pub mod traits;
pub mod websocket;

// Re-export main types
pub use errors::{Result, StreamError};
pub use hyperliquid::{AppContext, HyperliquidConfig, HyperliquidStreams, StreamCommands};
pub use traits::{Channel, Transport};
pub use websocket::{MonoioWebSocket, WebSocketTransport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::errors::{Result, StreamError};
    pub use crate::hyperliquid::{
        AppContext, ConnectionState, ConnectionStats, HyperliquidConfig, HyperliquidStreams, InboundMessage,
        MessageCallback, Network, QueuedMessage, ReconnectConfig, StreamCommands, SubscriptionId,
        SubscriptionInfo, SubscriptionKind, SubscriptionParams,
    };
    pub use crate::traits::{Channel, Transport};
    pub use crate::websocket::WebSocketTransport;
    pub use hyperstream_core::prelude::*;
}
