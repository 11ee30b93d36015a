//! Hyperliquid subscription model
//!
//! Subscription kinds, parameter sets, deterministic identities, the wire
//! subscribe/unsubscribe frames, inbound messages and subscriber callbacks.

use crate::errors::{Result, StreamError};
use hyperstream_core::Timestamp;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::str::FromStr;

/// Candle intervals accepted by the venue
pub const CANDLE_INTERVALS: [&str; 14] = [
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Closed set of stream kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionKind {
    #[serde(rename = "userEvents")]
    UserEvents,
    #[serde(rename = "l2Book")]
    L2Book,
    #[serde(rename = "trades")]
    Trades,
    #[serde(rename = "candle")]
    Candle,
    #[serde(rename = "orderUpdates")]
    OrderUpdates,
    #[serde(rename = "userFills")]
    UserFills,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 6] = [
        SubscriptionKind::UserEvents,
        SubscriptionKind::L2Book,
        SubscriptionKind::Trades,
        SubscriptionKind::Candle,
        SubscriptionKind::OrderUpdates,
        SubscriptionKind::UserFills,
    ];

    pub const MARKET_DATA: [SubscriptionKind; 3] = [
        SubscriptionKind::L2Book,
        SubscriptionKind::Trades,
        SubscriptionKind::Candle,
    ];

    /// Wire `type` discriminator
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::UserEvents => "userEvents",
            SubscriptionKind::L2Book => "l2Book",
            SubscriptionKind::Trades => "trades",
            SubscriptionKind::Candle => "candle",
            SubscriptionKind::OrderUpdates => "orderUpdates",
            SubscriptionKind::UserFills => "userFills",
        }
    }

    pub fn is_market_data(&self) -> bool {
        Self::MARKET_DATA.contains(self)
    }

    /// Kind-only routing: the channel tag up to the first `@`, compared
    /// case-insensitively with the wire type. Parameters are not consulted.
    pub fn matches_channel(&self, channel: &str) -> bool {
        let tag = channel.split('@').next().unwrap_or_default();
        tag.eq_ignore_ascii_case(self.as_str())
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StreamError::Validation(format!("Unknown subscription type: {s}")))
    }
}

/// Scalar parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Normalized parameter set: keys are kept sorted so identical requests
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionParams(BTreeMap<String, ParamValue>);

impl SubscriptionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn canonical_json(&self) -> String {
        // A map of strings to scalars always serializes.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Deterministic subscription identity: `<type>_<digest>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Digest of the canonical parameter JSON, truncated to 16 hex chars
    pub fn derive(kind: SubscriptionKind, params: &SubscriptionParams) -> Self {
        let digest = Sha256::digest(params.canonical_json().as_bytes());
        let hash = hex::encode(&digest[..8]);
        Self(format!("{}_{}", kind.as_str(), hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    method: &'static str,
    subscription: WireSubscription<'a>,
}

#[derive(Serialize)]
struct WireSubscription<'a> {
    #[serde(rename = "type")]
    kind: SubscriptionKind,
    #[serde(flatten)]
    params: &'a SubscriptionParams,
}

fn wire_message(method: &'static str, kind: SubscriptionKind, params: &SubscriptionParams) -> Result<String> {
    let request = WireRequest {
        method,
        subscription: WireSubscription { kind, params },
    };
    Ok(serde_json::to_string(&request)?)
}

/// `{"method":"subscribe","subscription":{"type":...,<params>}}`
pub fn subscribe_message(kind: SubscriptionKind, params: &SubscriptionParams) -> Result<String> {
    wire_message("subscribe", kind, params)
}

pub fn unsubscribe_message(kind: SubscriptionKind, params: &SubscriptionParams) -> Result<String> {
    wire_message("unsubscribe", kind, params)
}

/// Parsed inbound venue message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    /// Routing tag (`channel` field, empty when absent)
    pub channel: String,
    pub data: Value,
    pub received_at: Timestamp,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let data: Value = serde_json::from_str(text)?;
        let channel = data
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            channel,
            data,
            received_at: Timestamp::now(),
        })
    }
}

/// Poll-queue entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMessage {
    pub timestamp: Timestamp,
    pub data: Value,
}

impl From<&InboundMessage> for QueuedMessage {
    fn from(message: &InboundMessage) -> Self {
        Self {
            timestamp: message.received_at,
            data: message.data.clone(),
        }
    }
}

pub type CallbackResult = anyhow::Result<()>;
pub type CallbackFuture = Pin<Box<dyn Future<Output = CallbackResult>>>;

/// Subscriber callback; plain functions and async closures are both accepted
#[derive(Clone)]
pub enum MessageCallback {
    Sync(Rc<dyn Fn(&InboundMessage) -> CallbackResult>),
    Async(Rc<dyn Fn(InboundMessage) -> CallbackFuture>),
}

impl MessageCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&InboundMessage) -> CallbackResult + 'static,
    {
        MessageCallback::Sync(Rc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(InboundMessage) -> Fut + 'static,
        Fut: Future<Output = CallbackResult> + 'static,
    {
        MessageCallback::Async(Rc::new(move |message| Box::pin(f(message)) as CallbackFuture))
    }
}

impl std::fmt::Debug for MessageCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageCallback::Sync(_) => f.write_str("MessageCallback::Sync"),
            MessageCallback::Async(_) => f.write_str("MessageCallback::Async"),
        }
    }
}

/// Read-only projection of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_id: SubscriptionId,
    pub subscription_type: SubscriptionKind,
    pub params: SubscriptionParams,
    pub connected: bool,
    pub messages_received: u64,
    pub subscribed_at: Timestamp,
}
