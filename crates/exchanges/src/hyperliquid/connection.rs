//! Connection supervisor with automatic reconnection
//!
//! The supervisor is a single task that exclusively owns the live channel:
//! - connect, listen, detect failure, reconnect with bounded exponential backoff
//! - replays every confirmed registry entry after each successful connect
//! - serves sends from facade callers through a command queue
//! - shares connection health with the facade through `Rc<RefCell<_>>`
//!
//! No `RefCell` borrow is held across an `.await`.

use crate::errors::{Result, StreamError};
use crate::hyperliquid::config::ReconnectConfig;
use crate::hyperliquid::registry::SubscriptionRegistry;
use crate::hyperliquid::router::MessageRouter;
use crate::hyperliquid::types::InboundMessage;
use crate::traits::{Channel, Transport};
use hyperstream_core::{PerfTimer, Timestamp};

use flume::{Receiver, Sender};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Backoff budget spent; only an explicit start leaves this state
    Failed,
    Stopped,
}

/// Live connection metrics shared between the supervisor and the facade
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub connected: bool,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub reconnections: u64,
    /// Consecutive failed attempts, reset on every successful connect
    pub reconnect_attempts: u32,
    pub last_message_time: Option<Timestamp>,
    pub connection_start_time: Option<Timestamp>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected: false,
            messages_received: 0,
            messages_sent: 0,
            reconnections: 0,
            reconnect_attempts: 0,
            last_message_time: None,
            connection_start_time: None,
        }
    }

    pub fn stats(&self, subscriptions: usize) -> ConnectionStats {
        ConnectionStats {
            connected: self.connected,
            state: self.state,
            subscriptions,
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            reconnections: self.reconnections,
            reconnect_attempts: self.reconnect_attempts,
            last_message_time: self.last_message_time,
            connection_start_time: self.connection_start_time,
        }
    }
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub state: ConnectionState,
    pub subscriptions: usize,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub reconnections: u64,
    pub reconnect_attempts: u32,
    pub last_message_time: Option<Timestamp>,
    pub connection_start_time: Option<Timestamp>,
}

/// Requests served by the supervisor task
#[derive(Debug)]
pub enum Command {
    Send {
        text: String,
        reply: Sender<Result<()>>,
    },
    Stop,
}

/// Caller-side handle to the supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: Sender<Command>,
    health: Rc<RefCell<ConnectionHealth>>,
}

impl SupervisorHandle {
    pub fn new(commands: Sender<Command>, health: Rc<RefCell<ConnectionHealth>>) -> Self {
        Self { commands, health }
    }

    pub fn is_connected(&self) -> bool {
        self.health.borrow().connected
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.borrow().clone()
    }

    /// Transmit one text frame; fails fast with `NotConnected` while no
    /// channel is live instead of waiting out a reconnect.
    pub async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }

        let (reply, response) = flume::bounded(1);
        self.commands
            .send(Command::Send { text, reply })
            .map_err(|_| StreamError::NotConnected)?;

        response
            .recv_async()
            .await
            .map_err(|_| StreamError::NotConnected)?
    }

    pub(crate) fn request_stop(&self) -> bool {
        self.commands.send(Command::Stop).is_ok()
    }
}

/// Answer every queued command with `NotConnected`
pub(crate) fn drain_commands(commands: &Receiver<Command>) {
    while let Ok(command) = commands.try_recv() {
        if let Command::Send { reply, .. } = command {
            let _ = reply.send(Err(StreamError::NotConnected));
        }
    }
}

enum LoopEvent {
    Command(Option<Command>),
    Frame(Result<String>),
}

/// Owns one channel and drives the connect/listen/reconnect cycle
pub struct ConnectionSupervisor {
    url: Url,
    transport: Rc<dyn Transport>,
    registry: SubscriptionRegistry,
    router: MessageRouter,
    health: Rc<RefCell<ConnectionHealth>>,
    reconnect_config: ReconnectConfig,
    receive_timeout: Duration,
    commands: Receiver<Command>,
    channel: Option<Box<dyn Channel>>,
    running: bool,
}

impl ConnectionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: Url,
        transport: Rc<dyn Transport>,
        registry: SubscriptionRegistry,
        router: MessageRouter,
        health: Rc<RefCell<ConnectionHealth>>,
        reconnect_config: ReconnectConfig,
        receive_timeout: Duration,
        commands: Receiver<Command>,
    ) -> Self {
        Self {
            url,
            transport,
            registry,
            router,
            health,
            reconnect_config,
            receive_timeout,
            commands,
            channel: None,
            running: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn set_state(&self, state: ConnectionState) {
        self.health.borrow_mut().state = state;
    }

    /// Open the transport and replay the registry
    pub async fn connect(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        info!("🔗 Connecting to {}", self.url);

        let timer = PerfTimer::start("hyperliquid_connect");
        let channel = match self.transport.open(&self.url).await {
            Ok(channel) => channel,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(match e {
                    StreamError::Connection(_) => e,
                    other => StreamError::Connection(other.to_string()),
                });
            }
        };
        info!("✅ Connected to {} ({}μs)", self.url, timer.elapsed_micros());

        self.channel = Some(channel);
        {
            let mut health = self.health.borrow_mut();
            health.state = ConnectionState::Connected;
            health.connected = true;
            health.reconnect_attempts = 0;
            health.connection_start_time = Some(Timestamp::now());
        }

        self.resubscribe_all().await;
        Ok(())
    }

    /// Stop the loop and close the channel; close errors are only logged
    pub async fn disconnect(&mut self) {
        self.running = false;
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                warn!("Error closing channel: {}", e);
            }
            info!("🔌 Disconnected from {}", self.url);
        }

        let mut health = self.health.borrow_mut();
        health.connected = false;
        health.state = ConnectionState::Stopped;
    }

    async fn mark_disconnected(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.close().await;
        }

        let mut health = self.health.borrow_mut();
        health.connected = false;
        health.state = ConnectionState::Disconnected;
    }

    /// Retry `connect` with exponential backoff until it succeeds, the
    /// attempt budget is spent, or a stop arrives during a backoff wait.
    pub async fn reconnect(&mut self) -> Result<()> {
        loop {
            let attempt = {
                let mut health = self.health.borrow_mut();
                if health.reconnect_attempts >= self.reconnect_config.max_attempts {
                    health.state = ConnectionState::Failed;
                    error!("❌ Max reconnection attempts reached ({})", health.reconnect_attempts);
                    return Err(StreamError::ReconnectExhausted {
                        attempts: health.reconnect_attempts,
                    });
                }
                health.reconnect_attempts += 1;
                health.state = ConnectionState::Reconnecting;
                health.reconnect_attempts
            };

            let delay = self.reconnect_config.delay_for(attempt);
            warn!(
                "🔄 Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                attempt,
                self.reconnect_config.max_attempts
            );
            self.backoff(delay).await?;

            match self.connect().await {
                Ok(()) => {
                    self.health.borrow_mut().reconnections += 1;
                    info!("✅ Reconnected after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) => error!("❌ Reconnection attempt {} failed: {}", attempt, e),
            }
        }
    }

    /// Sleep for `delay` while still answering commands
    async fn backoff(&mut self, delay: Duration) -> Result<()> {
        let mut sleep = std::pin::pin!(monoio::time::sleep(delay));

        loop {
            monoio::select! {
                _ = sleep.as_mut() => return Ok(()),
                command = self.commands.recv_async() => match command {
                    Ok(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(StreamError::NotConnected));
                    }
                    Ok(Command::Stop) | Err(_) => {
                        self.running = false;
                        return Err(StreamError::Stopped);
                    }
                },
            }
        }
    }

    /// Replay the stored wire message of every confirmed entry
    pub async fn resubscribe_all(&mut self) {
        let messages = self.registry.replay_messages();
        if messages.is_empty() {
            return;
        }

        info!("🔁 Resubscribing {} subscription(s)", messages.len());
        for (id, message) in messages {
            match self.send(&message).await {
                Ok(()) => debug!("Resubscribed {}", id),
                Err(e) => {
                    warn!("Failed to resubscribe {}: {}", id, e);
                    if !self.is_connected() {
                        break;
                    }
                }
            }
        }
    }

    /// Transmit on the live channel
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(StreamError::NotConnected);
        };

        match channel.send(text).await {
            Ok(()) => {
                self.health.borrow_mut().messages_sent += 1;
                Ok(())
            }
            Err(e) => {
                if e.is_connection_lost() {
                    warn!("Connection lost while sending: {}", e);
                    self.mark_disconnected().await;
                }
                Err(e)
            }
        }
    }

    async fn next_event(&mut self) -> LoopEvent {
        let Some(channel) = self.channel.as_mut() else {
            return LoopEvent::Frame(Err(StreamError::NotConnected));
        };
        let commands = &self.commands;
        let receive_timeout = self.receive_timeout;

        monoio::select! {
            command = commands.recv_async() => LoopEvent::Command(command.ok()),
            frame = channel.receive(receive_timeout) => LoopEvent::Frame(frame),
        }
    }

    /// Count and route one frame. Frames that are not JSON are logged and
    /// dropped without touching the counters.
    async fn on_frame(&mut self, text: String) {
        let message = match InboundMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable message: {}", e);
                return;
            }
        };

        {
            let mut health = self.health.borrow_mut();
            health.messages_received += 1;
            health.last_message_time = Some(message.received_at);
        }
        self.router.route(message).await;
    }

    /// Run until stopped or until reconnection is exhausted. The channel is
    /// closed and queued commands are answered on every exit path.
    pub async fn listen(mut self) {
        self.running = true;
        info!("👂 Listening on {}", self.url);

        let failure = loop {
            if !self.running {
                break None;
            }

            if !self.is_connected() {
                match self.reconnect().await {
                    Ok(()) => continue,
                    Err(StreamError::Stopped) => break None,
                    Err(e) => break Some(e),
                }
            }

            match self.next_event().await {
                LoopEvent::Command(Some(Command::Send { text, reply })) => {
                    let result = self.send(&text).await;
                    let _ = reply.send(result);
                }
                LoopEvent::Command(Some(Command::Stop)) | LoopEvent::Command(None) => break None,
                LoopEvent::Frame(Ok(text)) => self.on_frame(text).await,
                LoopEvent::Frame(Err(StreamError::Timeout(_))) => {}
                LoopEvent::Frame(Err(StreamError::Serialization(e))) => {
                    warn!("Dropping undecodable frame: {}", e);
                }
                LoopEvent::Frame(Err(e)) => {
                    warn!("⚠️ Connection fault: {}", e);
                    self.mark_disconnected().await;
                }
            }
        };

        self.disconnect().await;
        if let Some(e) = failure {
            error!("❌ Stream supervisor giving up: {}", e);
            self.set_state(ConnectionState::Failed);
        }
        drain_commands(&self.commands);
        info!("🛑 Stream supervisor exited");
    }
}
