//! Cross-crate tests for HyperStream
//!
//! Scenario tests drive the public facade over the scripted mock transport;
//! property tests cover subscription identity and channel matching.

use hyperstream_exchanges::hyperliquid::mock::MockTransport;
use hyperstream_exchanges::prelude::*;
use std::rc::Rc;

pub const TEST_ACCOUNT: &str = "0xabcdef0123456789abcdef0123456789abcdef01";

/// Facade over a fresh mock transport with fast timers
pub fn mock_streams(config: HyperliquidConfig, base_delay_ms: u64) -> (HyperliquidStreams, MockTransport) {
    let transport = MockTransport::new();
    let config = config
        .with_ws_url("wss://mock.local/ws")
        .with_receive_timeout_ms(20)
        .with_reconnect(ReconnectConfig {
            max_attempts: 3,
            base_delay_ms,
        });

    let streams = HyperliquidStreams::new(config, Rc::new(transport.clone()))
        .unwrap_or_else(|e| panic!("mock config rejected: {e}"));
    (streams, transport)
}

#[cfg(test)]
mod scenario_tests;

#[cfg(test)]
mod property_tests;
