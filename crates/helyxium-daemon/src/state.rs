//! Application state management

use anyhow::Result;
use helyxium_discovery::{DetectionMonitor, DetectionOrchestrator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Continuous detection monitor
    pub monitor: Arc<DetectionMonitor>,
    /// Configuration, immutable after load
    pub config: Config,
    /// Cancelled on shutdown; stops the monitor and the server
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Resolve probe chains for this host and build the monitor
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let toggles = config.to_toggles()?;
        let orchestrator = DetectionOrchestrator::for_host(&toggles, config.probe_timeout())?;
        info!(
            os = %orchestrator.os(),
            interval_secs = config.monitor.interval_secs,
            hysteresis = config.monitor.hysteresis_cycles,
            "Detection configured"
        );

        let monitor = Arc::new(DetectionMonitor::new(orchestrator, config.monitor_config())?);
        Ok(Arc::new(Self::with_monitor(monitor, config)))
    }

    pub fn with_monitor(monitor: Arc<DetectionMonitor>, config: Config) -> Self {
        Self {
            monitor,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the background refresh loop
    pub fn spawn_monitor(&self) {
        let monitor = self.monitor.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            monitor.run(cancel).await;
        });
    }
}
