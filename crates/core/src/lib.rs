//! # HyperStream Core
//!
//! Runtime, timing and logging shared by the HyperStream crates.
//!
//! ## Architecture Principles
//!
//! 1. **Single-threaded async with monoio** - one cooperative scheduler, no locks
//! 2. **Wall-clock timestamps** - RFC 3339 on the wire, nanoseconds internally
//! 3. **Unified logging** - ftlog or tracing-subscriber behind one entry point

pub mod runtime;
pub mod timing;
pub mod logging;

pub use runtime::{StreamRuntime, RuntimeConfig, run_stream};
pub use timing::{nanos, PerfTimer, Timestamp};
pub use logging::init_logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::runtime::{StreamRuntime, RuntimeConfig, run_stream};
    pub use crate::timing::{nanos, PerfTimer, Timestamp};
    pub use crate::logging::init_logging;

    pub use monoio;
    pub use serde::{Deserialize, Serialize};
}
