//! Transport traits
//!
//! The connection supervisor only talks to the network through these two
//! seams. The runtime is single-threaded, so neither the traits nor their
//! futures are `Send`.

use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Opens duplex message channels to a remote endpoint
#[async_trait(?Send)]
pub trait Transport {
    /// Open a new channel; fails with [`StreamError::Connection`](crate::StreamError::Connection)
    async fn open(&self, url: &Url) -> Result<Box<dyn Channel>>;
}

/// One live duplex text channel
///
/// `receive` must tolerate being dropped mid-wait: the supervisor races it
/// against its command queue.
#[async_trait(?Send)]
pub trait Channel {
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Next text message.
    ///
    /// Returns [`StreamError::Timeout`](crate::StreamError::Timeout) when the
    /// window elapses idle and [`StreamError::Closed`](crate::StreamError::Closed)
    /// once the peer has gone away.
    async fn receive(&mut self, timeout: Duration) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}
