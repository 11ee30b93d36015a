//! Hyperliquid subscription facade
//!
//! Public operation set used by the command layer. Owns the registry, the
//! poll queue and the supervisor task.

use crate::errors::{Result, StreamError};
use crate::hyperliquid::config::HyperliquidConfig;
use crate::hyperliquid::connection::{
    drain_commands, Command, ConnectionHealth, ConnectionState, ConnectionStats, ConnectionSupervisor,
    SupervisorHandle,
};
use crate::hyperliquid::registry::SubscriptionRegistry;
use crate::hyperliquid::router::MessageRouter;
use crate::hyperliquid::types::{
    MessageCallback, QueuedMessage, SubscriptionId, SubscriptionInfo, SubscriptionKind, SubscriptionParams,
    CANDLE_INTERVALS,
};
use crate::traits::Transport;

use flume::{Receiver, Sender};
use monoio::task::JoinHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Returns the start permit on drop
struct StartPermit<'a>(&'a Sender<()>);

impl Drop for StartPermit<'_> {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

pub struct HyperliquidStreams {
    config: HyperliquidConfig,
    url: Url,
    transport: Rc<dyn Transport>,
    health: Rc<RefCell<ConnectionHealth>>,
    handle: SupervisorHandle,
    registry: SubscriptionRegistry,
    commands: Receiver<Command>,
    queue_tx: Sender<QueuedMessage>,
    queue_rx: Receiver<QueuedMessage>,
    task: RefCell<Option<JoinHandle<()>>>,
    start_permit: (Sender<()>, Receiver<()>),
}

impl HyperliquidStreams {
    pub fn new(config: HyperliquidConfig, transport: Rc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let url = Url::parse(&config.ws_url)?;

        let health = Rc::new(RefCell::new(ConnectionHealth::new()));
        let (commands_tx, commands) = flume::unbounded();
        let handle = SupervisorHandle::new(commands_tx, health.clone());
        let registry = SubscriptionRegistry::new(handle.clone());
        let (queue_tx, queue_rx) = flume::unbounded();

        let start_permit = flume::bounded(1);
        let _ = start_permit.0.try_send(());

        info!("🚀 Hyperliquid streams configured: {}", config.summary());

        Ok(Self {
            config,
            url,
            transport,
            health,
            handle,
            registry,
            commands,
            queue_tx,
            queue_rx,
            task: RefCell::new(None),
            start_permit,
        })
    }

    pub fn config(&self) -> &HyperliquidConfig {
        &self.config
    }

    /// True while a supervisor task is alive and not stopped or failed
    pub fn is_running(&self) -> bool {
        self.task.borrow().is_some()
            && matches!(
                self.health.borrow().state,
                ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
                    | ConnectionState::Disconnected
            )
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Connect and spawn the listen loop. No-op while already running.
    pub async fn start(&self) -> Result<()> {
        let _ = self.start_permit.1.recv_async().await;
        let _permit = StartPermit(&self.start_permit.0);

        if self.is_running() {
            return Ok(());
        }

        // Reap a supervisor that gave up on its own.
        let finished = self.task.borrow_mut().take();
        if let Some(task) = finished {
            task.await;
        }
        drain_commands(&self.commands);

        let router = MessageRouter::new(self.registry.clone(), self.queue_tx.clone());
        let mut supervisor = ConnectionSupervisor::new(
            self.url.clone(),
            self.transport.clone(),
            self.registry.clone(),
            router,
            self.health.clone(),
            self.config.reconnect.clone(),
            self.config.receive_timeout(),
            self.commands.clone(),
        );

        supervisor.connect().await?;
        *self.task.borrow_mut() = Some(monoio::spawn(supervisor.listen()));
        info!("✅ Hyperliquid stream started");
        Ok(())
    }

    /// Stop the listen loop and wait for it to close the channel. A start
    /// still connecting is let through first and then stopped.
    pub async fn stop(&self) {
        let _ = self.start_permit.1.recv_async().await;
        let _permit = StartPermit(&self.start_permit.0);

        let task = self.task.borrow_mut().take();
        let Some(task) = task else {
            return;
        };

        self.handle.request_stop();
        task.await;
        drain_commands(&self.commands);
        info!("🛑 Hyperliquid stream stopped");
    }

    fn account(&self) -> Result<&str> {
        self.config
            .account_address
            .as_deref()
            .ok_or_else(|| StreamError::Configuration("Account address required for user subscriptions".to_string()))
    }

    pub async fn subscribe_user_events(&self, callback: Option<MessageCallback>) -> Result<SubscriptionId> {
        let params = SubscriptionParams::new().with("user", self.account()?);
        let registration = self.registry.register(SubscriptionKind::UserEvents, params, callback).await?;
        Ok(registration.id)
    }

    pub async fn subscribe_market_data(
        &self,
        coin: &str,
        data_types: &[&str],
        callback: Option<MessageCallback>,
    ) -> Result<Vec<SubscriptionId>> {
        self.subscribe_market_data_with_interval(coin, data_types, None, callback).await
    }

    /// One subscription per data type, all or nothing. Every data type is
    /// validated before anything is sent.
    pub async fn subscribe_market_data_with_interval(
        &self,
        coin: &str,
        data_types: &[&str],
        interval: Option<&str>,
        callback: Option<MessageCallback>,
    ) -> Result<Vec<SubscriptionId>> {
        let coin = coin.trim();
        if coin.is_empty() {
            return Err(StreamError::Validation("coin must not be empty".to_string()));
        }
        if data_types.is_empty() {
            return Err(StreamError::Validation("at least one data type is required".to_string()));
        }

        let kinds = data_types
            .iter()
            .map(|name| match name.parse::<SubscriptionKind>() {
                Ok(kind) if kind.is_market_data() => Ok(kind),
                _ => Err(StreamError::Validation(format!(
                    "Invalid data type: {name}. Must be one of: l2Book, trades, candle"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let interval = interval.unwrap_or(self.config.default_candle_interval.as_str());
        if kinds.contains(&SubscriptionKind::Candle) && !CANDLE_INTERVALS.contains(&interval) {
            return Err(StreamError::Validation(format!("Invalid candle interval: {interval}")));
        }

        let requests = kinds
            .into_iter()
            .map(|kind| {
                let mut params = SubscriptionParams::new().with("coin", coin);
                if kind == SubscriptionKind::Candle {
                    params.insert("interval", interval);
                }
                (kind, params)
            })
            .collect();

        self.register_all(requests, callback).await
    }

    /// Order updates and fills for the configured account
    pub async fn subscribe_order_updates(&self, callback: Option<MessageCallback>) -> Result<Vec<SubscriptionId>> {
        let user = self.account()?;
        let requests = [SubscriptionKind::OrderUpdates, SubscriptionKind::UserFills]
            .into_iter()
            .map(|kind| (kind, SubscriptionParams::new().with("user", user)))
            .collect();

        self.register_all(requests, callback).await
    }

    /// Register each request; on the first failure deregister the ones this
    /// call created and surface that failure.
    async fn register_all(
        &self,
        requests: Vec<(SubscriptionKind, SubscriptionParams)>,
        callback: Option<MessageCallback>,
    ) -> Result<Vec<SubscriptionId>> {
        let mut ids = Vec::with_capacity(requests.len());
        let mut created = Vec::new();

        for (kind, params) in requests {
            match self.registry.register(kind, params, callback.clone()).await {
                Ok(registration) => {
                    if registration.created {
                        created.push(registration.id.clone());
                    }
                    ids.push(registration.id);
                }
                Err(e) => {
                    for id in created.iter().rev() {
                        if let Err(rollback) = self.registry.deregister(id).await {
                            warn!("Rollback of {} failed: {}", id, rollback);
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(ids)
    }

    pub fn list_active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.snapshot(self.is_connected())
    }

    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.registry.deregister(id).await
    }

    pub async fn unsubscribe_all(&self) -> usize {
        self.registry.deregister_all().await
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.health.borrow().stats(self.registry.len())
    }

    /// Next queued message, or `None` once `timeout` elapses
    pub async fn next_message(&self, timeout: Duration) -> Option<QueuedMessage> {
        match monoio::time::timeout(timeout, self.queue_rx.recv_async()).await {
            Ok(Ok(message)) => Some(message),
            _ => None,
        }
    }

    pub fn pending_messages(&self) -> usize {
        self.queue_rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperliquid::mock::{wait_for, MockTransport};

    const ACCOUNT: &str = "0xabcdef0123456789abcdef0123456789abcdef01";

    fn streams(config: HyperliquidConfig) -> (HyperliquidStreams, MockTransport) {
        let transport = MockTransport::new();
        let config = config
            .with_ws_url("wss://mock.local/ws")
            .with_receive_timeout_ms(20)
            .with_reconnect(crate::hyperliquid::config::ReconnectConfig {
                max_attempts: 3,
                base_delay_ms: 1,
            });
        let streams = HyperliquidStreams::new(config, Rc::new(transport.clone())).unwrap();
        (streams, transport)
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_start_is_idempotent() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();
        streams.start().await.unwrap();

        assert!(streams.is_running());
        assert_eq!(transport.open_count(), 1);

        streams.stop().await;
        assert!(!streams.is_running());
        assert_eq!(streams.connection_stats().state, ConnectionState::Stopped);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_start_failure_surfaces_connection_error() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        transport.fail_next_opens(1);

        assert!(matches!(streams.start().await, Err(StreamError::Connection(_))));
        assert!(!streams.is_running());

        streams.start().await.unwrap();
        assert!(streams.is_connected());
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_stop_waits_for_a_start_in_progress() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        transport.delay_opens(Duration::from_millis(50));
        let streams = Rc::new(streams);

        let starting = streams.clone();
        let start = monoio::spawn(async move { starting.start().await });
        monoio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(streams.connection_stats().state, ConnectionState::Connecting);

        streams.stop().await;
        assert!(!streams.is_running());
        assert_eq!(streams.connection_stats().state, ConnectionState::Stopped);

        assert!(start.await.is_ok());
        assert!(!streams.is_running());
        assert!(!streams.is_connected());
        assert_eq!(transport.open_count(), 1);
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_user_subscriptions_require_account() {
        let (streams, _transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();

        assert!(matches!(
            streams.subscribe_user_events(None).await,
            Err(StreamError::Configuration(_))
        ));
        assert!(matches!(
            streams.subscribe_order_updates(None).await,
            Err(StreamError::Configuration(_))
        ));
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_unknown_data_type_registers_nothing() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();

        let result = streams.subscribe_market_data("BTC", &["l2Book", "trades", "bogus"], None).await;
        assert!(matches!(result, Err(StreamError::Validation(_))));
        assert!(streams.list_active_subscriptions().is_empty());
        assert!(transport.sent().is_empty());
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_candle_uses_default_interval() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();

        streams.subscribe_market_data("ETH", &["candle"], None).await.unwrap();
        assert_eq!(
            transport.sent(),
            vec![r#"{"method":"subscribe","subscription":{"type":"candle","coin":"ETH","interval":"1m"}}"#.to_string()]
        );

        let bad = streams
            .subscribe_market_data_with_interval("ETH", &["candle"], Some("7m"), None)
            .await;
        assert!(matches!(bad, Err(StreamError::Validation(_))));
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_send_failure_rolls_back_created_entries() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();

        // A pre-existing trades entry must survive the rollback.
        streams.subscribe_market_data("BTC", &["trades"], None).await.unwrap();
        transport.fail_sends_after(2);

        let result = streams.subscribe_market_data("BTC", &["l2Book", "trades", "candle"], None).await;
        assert!(matches!(result, Err(StreamError::Subscription(_))));

        let kinds: Vec<SubscriptionKind> = streams
            .list_active_subscriptions()
            .into_iter()
            .map(|info| info.subscription_type)
            .collect();
        assert_eq!(kinds, vec![SubscriptionKind::Trades]);
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_order_updates_scenario() {
        let (streams, transport) = streams(HyperliquidConfig::default().with_account(ACCOUNT));
        streams.start().await.unwrap();

        let ids = streams.subscribe_order_updates(None).await.unwrap();
        assert_eq!(ids.len(), 2);

        let active = streams.list_active_subscriptions();
        assert_eq!(active.len(), 2);
        for info in &active {
            assert_eq!(info.params.get("user").map(|v| v.to_string()), Some(ACCOUNT.to_string()));
            assert_eq!(info.messages_received, 0);
            assert!(info.connected);
        }

        transport.push_inbound(r#"{"channel":"orderUpdates","data":[{"oid":1}]}"#);
        assert!(streams.next_message(Duration::from_secs(1)).await.is_some());

        let counts: Vec<(SubscriptionKind, u64)> = streams
            .list_active_subscriptions()
            .into_iter()
            .map(|info| (info.subscription_type, info.messages_received))
            .collect();
        assert_eq!(
            counts,
            vec![(SubscriptionKind::OrderUpdates, 1), (SubscriptionKind::UserFills, 0)]
        );
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_subscriptions_survive_restart() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();
        streams.subscribe_market_data("BTC", &["trades", "l2Book"], None).await.unwrap();
        streams.stop().await;

        assert_eq!(streams.list_active_subscriptions().len(), 2);
        assert!(matches!(
            streams.subscribe_market_data("SOL", &["trades"], None).await,
            Err(StreamError::Subscription(_))
        ));

        streams.start().await.unwrap();
        assert_eq!(transport.sent().len(), 4);
        assert_eq!(transport.sent()[0..2], transport.sent()[2..4]);
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_restart_after_exhaustion() {
        let (streams, transport) = streams(HyperliquidConfig::default());
        streams.start().await.unwrap();

        transport.fail_next_opens(10);
        transport.drop_connection();
        assert!(
            wait_for(
                || streams.connection_stats().state == ConnectionState::Failed,
                Duration::from_secs(1)
            )
            .await
        );
        assert!(!streams.is_running());

        transport.fail_next_opens(0);
        streams.start().await.unwrap();
        assert!(streams.is_connected());
        assert_eq!(streams.connection_stats().reconnect_attempts, 0);
        streams.stop().await;
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_unsubscribe_unknown_id() {
        let (streams, _transport) = streams(HyperliquidConfig::default());
        let result = streams.unsubscribe(&SubscriptionId::from("trades_0000000000000000")).await;
        assert!(matches!(result, Err(StreamError::NotFound(_))));
        assert_eq!(streams.unsubscribe_all().await, 0);
    }
}
