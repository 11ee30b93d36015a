//! Hyperliquid streaming configuration

use crate::errors::{Result, StreamError};
use crate::hyperliquid::types::CANDLE_INTERVALS;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

pub const ENV_NETWORK: &str = "HYPERLIQUID_NETWORK";
pub const ENV_ACCOUNT_ADDRESS: &str = "HYPERLIQUID_ACCOUNT_ADDRESS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "HYPERLIQUID_MAX_RECONNECT_ATTEMPTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => MAINNET_WS_URL,
            Network::Testnet => TESTNET_WS_URL,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(StreamError::Configuration(format!("Unknown network: {other}"))),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before `attempt` (1-based): base x 2^(attempt-1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// Hyperliquid stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperliquidConfig {
    pub network: Network,
    pub ws_url: String,
    pub account_address: Option<String>,
    pub reconnect: ReconnectConfig,
    pub receive_timeout_ms: u64,
    pub default_candle_interval: String,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            ws_url: MAINNET_WS_URL.to_string(),
            account_address: None,
            reconnect: ReconnectConfig::default(),
            receive_timeout_ms: 30_000,
            default_candle_interval: "1m".to_string(),
        }
    }
}

impl HyperliquidConfig {
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            ws_url: TESTNET_WS_URL.to_string(),
            ..Default::default()
        }
    }

    pub fn with_account(mut self, address: impl Into<String>) -> Self {
        self.account_address = Some(address.into());
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_receive_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.receive_timeout_ms = timeout_ms;
        self
    }

    pub fn with_default_candle_interval(mut self, interval: impl Into<String>) -> Self {
        self.default_candle_interval = interval.into();
        self
    }

    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_NETWORK) {
            Some(network) => match network.parse::<Network>()? {
                Network::Mainnet => Self::default(),
                Network::Testnet => Self::testnet(),
            },
            None => Self::default(),
        };

        if let Some(address) = lookup(ENV_ACCOUNT_ADDRESS).filter(|a| !a.trim().is_empty()) {
            config.account_address = Some(address.trim().to_string());
        }

        if let Some(attempts) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            config.reconnect.max_attempts = attempts.trim().parse().map_err(|_| {
                StreamError::Configuration(format!("{ENV_MAX_RECONNECT_ATTEMPTS} must be an integer, got {attempts}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.ws_url)
            .map_err(|e| StreamError::Configuration(format!("Invalid ws_url {}: {e}", self.ws_url)))?;

        if let Some(address) = &self.account_address {
            validate_address(address)?;
        }

        if self.receive_timeout_ms == 0 {
            return Err(StreamError::Configuration("receive_timeout_ms must be positive".to_string()));
        }

        if !CANDLE_INTERVALS.contains(&self.default_candle_interval.as_str()) {
            return Err(StreamError::Configuration(format!(
                "Unsupported default candle interval: {}",
                self.default_candle_interval
            )));
        }

        Ok(())
    }

    /// Human readable description with the account address masked
    pub fn summary(&self) -> String {
        let account = self
            .account_address
            .as_deref()
            .map(mask_address)
            .unwrap_or_else(|| "not configured".to_string());

        format!(
            "network={} ws_url={} account={} reconnect={}x{}ms receive_timeout={}ms candle_interval={}",
            self.network,
            self.ws_url,
            account,
            self.reconnect.max_attempts,
            self.reconnect.base_delay_ms,
            self.receive_timeout_ms,
            self.default_candle_interval,
        )
    }
}

fn validate_address(address: &str) -> Result<()> {
    let valid = address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());

    if valid {
        Ok(())
    } else {
        Err(StreamError::Configuration(format!(
            "Account address must be 0x followed by 40 hex characters, got {address}"
        )))
    }
}

fn mask_address(address: &str) -> String {
    if address.len() <= 10 {
        return "***".to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
