//! Configuration loading and validation

use anyhow::{bail, Result};
use helyxium_core::ProbeId;
use helyxium_discovery::{MonitorConfig, Os, ProbeToggles};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub probes: ProbesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP/WebSocket surface
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Seconds between scheduled refresh cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Consecutive misses before an entity is reported removed
    #[serde(default = "default_hysteresis")]
    pub hysteresis_cycles: u32,
    /// Per-probe deadline in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            hysteresis_cycles: default_hysteresis(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    5
}

fn default_hysteresis() -> u32 {
    2
}

fn default_probe_timeout() -> u64 {
    3000
}

/// Probes switched off per operating system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default)]
    pub linux: OsProbes,
    #[serde(default)]
    pub windows: OsProbes,
    #[serde(default)]
    pub macos: OsProbes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsProbes {
    /// Probe names, e.g. "lsusb" or "sysinfo_processes"
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl ProbesConfig {
    fn sections(&self) -> [(Os, &OsProbes); 3] {
        [
            (Os::Linux, &self.linux),
            (Os::Windows, &self.windows),
            (Os::Macos, &self.macos),
        ]
    }
}

impl Config {
    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_secs < 1 {
            bail!("monitor.interval_secs must be at least 1");
        }
        if self.monitor.hysteresis_cycles < 1 {
            bail!("monitor.hysteresis_cycles must be at least 1");
        }
        if self.monitor.probe_timeout_ms < 100 {
            bail!("monitor.probe_timeout_ms must be at least 100");
        }
        for (os, section) in self.probes.sections() {
            for name in &section.disabled {
                if name.parse::<ProbeId>().is_err() {
                    bail!("probes.{}.disabled: unknown probe '{}'", os, name);
                }
            }
        }
        Ok(())
    }

    pub fn to_toggles(&self) -> Result<ProbeToggles> {
        let mut toggles = ProbeToggles::new();
        for (os, section) in self.probes.sections() {
            toggles.disable_named(os, &section.disabled)?;
        }
        Ok(toggles)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.monitor.interval_secs),
            hysteresis_cycles: self.monitor.hysteresis_cycles,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.probe_timeout_ms)
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut config = Config::default();
    // Shown as an example; the process fallback still covers this OS
    config.probes.linux.disabled = vec!["sysinfo_processes".to_string()];

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
