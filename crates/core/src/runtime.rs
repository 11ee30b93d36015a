//! Single-threaded async runtime based on monoio
//!
//! The streaming subsystem relies on one cooperative scheduler per thread:
//! shared state is `Rc<RefCell<_>>` and only ever touched between suspension
//! points. The timer driver must be enabled for backoff and receive windows.

use monoio::{FusionDriver, RuntimeBuilder};
use tracing::info;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name used in log output
    pub thread_name: String,
    /// io_uring submission queue depth
    pub entries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "hyperstream-main".to_string(),
            entries: 1024,
        }
    }
}

/// HyperStream runtime wrapper
pub struct StreamRuntime {
    config: RuntimeConfig,
}

impl StreamRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        info!("🚀 HyperStream runtime configured");
        info!("   Thread: {}", config.thread_name);
        info!("   Ring entries: {}", config.entries);

        Self { config }
    }

    /// Build the runtime and drive `f` to completion
    pub fn start<F, Fut>(self, f: F) -> std::io::Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future,
    {
        info!("▶️  Starting HyperStream runtime");
        let mut runtime = RuntimeBuilder::<FusionDriver>::new()
            .with_entries(self.config.entries)
            .enable_timer()
            .build()?;
        let result = runtime.block_on(f());
        info!("⏹️  HyperStream runtime stopped");
        Ok(result)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for StreamRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a default runtime and run `f` on it
pub fn run_stream<F, Fut>(f: F) -> std::io::Result<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    StreamRuntime::new().start(f)
}
