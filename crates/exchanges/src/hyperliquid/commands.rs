//! Stream command surface
//!
//! Every command returns a JSON payload: `{"success": true, ...}` or
//! `{"success": false, "error": ..., "error_kind": ...}`. Subscribe commands
//! start the stream first when it is not connected.

use crate::errors::{Result, StreamError};
use crate::hyperliquid::config::HyperliquidConfig;
use crate::hyperliquid::streams::HyperliquidStreams;
use crate::hyperliquid::types::SubscriptionId;
use crate::traits::Transport;
use crate::websocket::WebSocketTransport;

use serde_json::{json, Value};
use std::rc::Rc;
use std::time::Duration;
use tracing::info;

const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Explicitly constructed application state handed to the command layer
pub struct AppContext {
    pub config: HyperliquidConfig,
    pub streams: Rc<HyperliquidStreams>,
}

impl AppContext {
    pub fn new(config: HyperliquidConfig, transport: Rc<dyn Transport>) -> Result<Self> {
        let streams = Rc::new(HyperliquidStreams::new(config.clone(), transport)?);
        Ok(Self { config, streams })
    }

    /// Environment configuration over the TLS WebSocket transport
    pub fn from_env() -> Result<Self> {
        let config = HyperliquidConfig::from_env()?;
        Self::new(config, Rc::new(WebSocketTransport::default()))
    }

    pub fn stream_commands(&self) -> StreamCommands {
        StreamCommands {
            streams: self.streams.clone(),
        }
    }
}

fn failure(error: &StreamError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "error_kind": error.kind(),
    })
}

fn respond(result: Result<Value>) -> Value {
    result.unwrap_or_else(|e| failure(&e))
}

pub struct StreamCommands {
    streams: Rc<HyperliquidStreams>,
}

impl StreamCommands {
    async fn ensure_started(&self) -> Result<()> {
        if !self.streams.is_connected() {
            self.streams.start().await?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Value {
        respond(self.try_start().await)
    }

    async fn try_start(&self) -> Result<Value> {
        self.streams.start().await?;
        Ok(json!({ "success": true, "connection_stats": self.streams.connection_stats() }))
    }

    pub async fn stop(&self) -> Value {
        self.streams.stop().await;
        json!({ "success": true, "connection_stats": self.streams.connection_stats() })
    }

    pub async fn subscribe_user_events(&self) -> Value {
        respond(self.try_subscribe_user_events().await)
    }

    async fn try_subscribe_user_events(&self) -> Result<Value> {
        self.ensure_started().await?;
        let id = self.streams.subscribe_user_events(None).await?;
        Ok(json!({
            "success": true,
            "subscription_id": id,
            "subscription_type": "user_events",
            "account": self.streams.config().account_address,
        }))
    }

    pub async fn subscribe_market_data(&self, coin: &str, data_types: &[String], interval: Option<&str>) -> Value {
        respond(self.try_subscribe_market_data(coin, data_types, interval).await)
    }

    async fn try_subscribe_market_data(&self, coin: &str, data_types: &[String], interval: Option<&str>) -> Result<Value> {
        self.ensure_started().await?;
        let types: Vec<&str> = data_types.iter().map(String::as_str).collect();
        let ids = self
            .streams
            .subscribe_market_data_with_interval(coin, &types, interval, None)
            .await?;
        Ok(json!({
            "success": true,
            "subscription_ids": ids,
            "coin": coin,
            "data_types": data_types,
        }))
    }

    pub async fn subscribe_order_updates(&self) -> Value {
        respond(self.try_subscribe_order_updates().await)
    }

    async fn try_subscribe_order_updates(&self) -> Result<Value> {
        self.ensure_started().await?;
        let ids = self.streams.subscribe_order_updates(None).await?;
        Ok(json!({
            "success": true,
            "subscription_ids": ids,
            "subscription_types": ["order_updates", "user_fills"],
            "account": self.streams.config().account_address,
        }))
    }

    pub fn get_active_subscriptions(&self) -> Value {
        let subscriptions = self.streams.list_active_subscriptions();
        json!({
            "success": true,
            "total_subscriptions": subscriptions.len(),
            "subscriptions": subscriptions,
            "connection_stats": self.streams.connection_stats(),
        })
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Value {
        let id = SubscriptionId::from(subscription_id);
        match self.streams.unsubscribe(&id).await {
            Ok(()) => json!({ "success": true, "subscription_id": id }),
            Err(e) => failure(&e),
        }
    }

    pub async fn unsubscribe_all(&self) -> Value {
        let removed = self.streams.unsubscribe_all().await;
        json!({ "success": true, "unsubscribed": removed })
    }

    pub fn get_connection_stats(&self) -> Value {
        json!({ "success": true, "connection_stats": self.streams.connection_stats() })
    }

    pub async fn get_next_message(&self, timeout: Duration) -> Value {
        let message = self.streams.next_message(timeout).await;
        json!({ "success": true, "message": message })
    }

    /// Dispatch a command by name with JSON arguments
    pub async fn execute(&self, name: &str, args: &Value) -> Value {
        info!("⚙️ Stream command: {}", name);
        match name {
            "start" => self.start().await,
            "stop" => self.stop().await,
            "subscribe_user_events" => self.subscribe_user_events().await,
            "subscribe_market_data" => {
                let coin = args["coin"].as_str().unwrap_or_default();
                let data_types: Vec<String> = args["data_types"]
                    .as_array()
                    .map(|types| types.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let interval = args["interval"].as_str();
                self.subscribe_market_data(coin, &data_types, interval).await
            }
            "subscribe_order_updates" => self.subscribe_order_updates().await,
            "get_active_subscriptions" => self.get_active_subscriptions(),
            "unsubscribe" => match args["subscription_id"].as_str() {
                Some(id) => self.unsubscribe(id).await,
                None => failure(&StreamError::Validation("subscription_id is required".to_string())),
            },
            "unsubscribe_all" => self.unsubscribe_all().await,
            "get_connection_stats" => self.get_connection_stats(),
            "get_next_message" => {
                let timeout_ms = args["timeout_ms"].as_u64().unwrap_or(DEFAULT_POLL_TIMEOUT_MS);
                self.get_next_message(Duration::from_millis(timeout_ms)).await
            }
            other => failure(&StreamError::Validation(format!("Unknown command: {other}"))),
        }
    }
}
