//! Helyxium Discovery - VR hardware and platform detection
//!
//! This crate runs OS-specific probes and turns their evidence into snapshots:
//! - Probes for USB buses, Plug and Play, the Windows registry, install
//!   directories, package managers, and process tables
//! - A registry mapping (target, OS) to an ordered probe chain
//! - An orchestrator that runs every chain concurrently and merges the results
//! - A monitor that refreshes on a schedule and publishes diffs

pub mod context;
pub mod error;
pub mod merge;
pub mod monitor;
pub mod orchestrator;
pub mod probes;
pub mod registry;

pub use context::{Os, ProbeContext};
pub use error::DiscoveryError;
pub use monitor::{CycleUpdate, DetectionMonitor, MonitorConfig, RefreshHandle};
pub use orchestrator::DetectionOrchestrator;
pub use probes::Probe;
pub use registry::{ProbeRegistry, ProbeToggles, ResolvedChains};
