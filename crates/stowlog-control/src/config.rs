//! Configuration for the control center

use std::path::PathBuf;
use std::time::Duration;

use stowlog_storage::EngineConfig;

/// Configuration for a [`ControlCenter`](crate::ControlCenter)
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Engine configuration passed to `init`
    pub engine: EngineConfig,
    /// Capacity of the writer command queue
    pub queue_capacity: usize,
    /// Period of the maintenance tick sent to the writer
    pub tick_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ControlConfig {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            queue_capacity: 1024,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Configuration with cache and log directories under one base directory
    pub fn with_base_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self::new(EngineConfig::new(base.join("cache"), base.join("logs")))
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
