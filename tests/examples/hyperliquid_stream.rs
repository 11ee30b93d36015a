//! Hyperliquid streaming demo
//!
//! Loads configuration from the environment (`.env` supported), starts the
//! supervised WebSocket, subscribes to market data for one coin and polls the
//! message queue while printing connection statistics.
//!
//! ```text
//! HYPERLIQUID_NETWORK=testnet cargo run -p hyperstream-tests --example hyperliquid_stream -- ETH
//! ```

use hyperstream_core::prelude::*;
use hyperstream_exchanges::prelude::*;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

const RUN_SECONDS: u64 = 30;

#[monoio::main(timer_enabled = true)]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let coin = std::env::args().nth(1).unwrap_or_else(|| "BTC".to_string());
    let config = HyperliquidConfig::from_env()?;
    info!("🚀 Hyperliquid stream demo");
    info!("   {}", config.summary());

    let has_account = config.account_address.is_some();
    let streams = HyperliquidStreams::new(config, Rc::new(WebSocketTransport::default()))?;
    streams.start().await?;

    let trades_seen = Rc::new(std::cell::Cell::new(0u64));
    let counter = trades_seen.clone();
    let on_trade = MessageCallback::sync(move |message| {
        counter.set(counter.get() + 1);
        if let Some(trades) = message.data["data"].as_array() {
            for trade in trades {
                info!("💱 TRADE {} {} @ {}", trade["coin"], trade["sz"], trade["px"]);
            }
        }
        Ok(())
    });

    let ids = streams.subscribe_market_data(&coin, &["trades", "l2Book"], Some(on_trade)).await?;
    info!("📡 Subscribed: {:?}", ids);

    if has_account {
        let ids = streams.subscribe_order_updates(None).await?;
        info!("📡 Order updates: {:?}", ids);
    } else {
        info!("🌐 No account configured, skipping user streams");
    }

    let started = Timestamp::now();
    let mut polled = 0u64;
    while started.elapsed_millis() < RUN_SECONDS * 1000 {
        match streams.next_message(Duration::from_secs(1)).await {
            Some(message) => {
                polled += 1;
                if polled % 50 == 0 {
                    info!("📥 {} messages polled (latest at {})", polled, message.timestamp);
                }
            }
            None => warn!("⏳ No message within 1s"),
        }

        if polled % 100 == 0 {
            let stats = streams.connection_stats();
            info!(
                "📊 state={:?} received={} sent={} reconnections={}",
                stats.state, stats.messages_received, stats.messages_sent, stats.reconnections
            );
        }
    }

    for subscription in streams.list_active_subscriptions() {
        info!(
            "   {} ({}) received {}",
            subscription.subscription_id, subscription.subscription_type, subscription.messages_received
        );
    }
    info!("💱 Trade callbacks fired: {}", trades_seen.get());

    let removed = streams.unsubscribe_all().await;
    info!("🧹 Unsubscribed {} stream(s)", removed);
    streams.stop().await;

    Ok(())
}
