//! Wall-clock timestamps and latency timers
//!
//! Every timestamp the streaming layer reports (connection start, last
//! message, subscription creation, poll-queue entries) is a [`Timestamp`]:
//! nanoseconds since the Unix epoch, rendered as RFC 3339 on the wire.

use std::time::{SystemTime, UNIX_EPOCH};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wall-clock timestamp with nanosecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    pub nanos: u64,
}

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self { nanos: nanos() }
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.nanos / 1_000_000_000;
        let nsecs = (self.nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs as i64, nsecs).unwrap_or_else(Utc::now)
    }

    /// RFC 3339 rendering with millisecond precision
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn elapsed_nanos(&self) -> u64 {
        nanos().saturating_sub(self.nanos)
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.elapsed_nanos() / 1_000
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed_nanos() / 1_000_000
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        let nanos = dt.timestamp() as u64 * 1_000_000_000 + dt.timestamp_subsec_nanos() as u64;
        Self { nanos }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Timestamp::from(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

/// Nanoseconds since the Unix epoch
#[inline]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Scoped latency timer, logs at debug level when dropped
pub struct PerfTimer {
    start: Timestamp,
    name: String,
    logged: bool,
}

impl PerfTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Timestamp::now(),
            name: name.into(),
            logged: false,
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed_micros()
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.start.elapsed_millis()
    }

    /// Log the elapsed time now instead of on drop
    pub fn log_elapsed(mut self) {
        self.emit();
    }

    fn emit(&mut self) {
        if self.logged {
            return;
        }
        self.logged = true;
        let micros = self.elapsed_micros();
        crate::log_latency!(self.name, micros);
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        self.emit();
    }
}
