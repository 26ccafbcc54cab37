//! OS capability probes
//!
//! Each probe implements one detection technique on one family of operating
//! systems. A probe never fails its caller: whatever happens is classified
//! into a [`ProbeOutcome`](helyxium_core::ProbeOutcome) on the returned report.

pub mod install_markers;
pub mod macos_usb;
pub mod package_manager;
pub mod processes;
pub mod usb_linux;
pub mod windows_devices;
pub mod windows_registry;

use async_trait::async_trait;
use helyxium_core::{ProbeId, ProbeReport};
use std::sync::Arc;

use crate::context::ProbeContext;

/// A single detection technique
#[async_trait]
pub trait Probe: Send + Sync {
    fn id(&self) -> ProbeId;

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport;
}

/// Construct the implementation behind a probe identifier
pub fn build(id: ProbeId) -> Arc<dyn Probe> {
    match id {
        ProbeId::SysfsUsb => Arc::new(usb_linux::SysfsUsbProbe),
        ProbeId::Lsusb => Arc::new(usb_linux::LsusbProbe),
        ProbeId::PnpDevices => Arc::new(windows_devices::PnpDevicesProbe),
        ProbeId::Pnputil => Arc::new(windows_devices::PnputilProbe),
        ProbeId::SystemProfilerUsb => Arc::new(macos_usb::SystemProfilerUsbProbe),
        ProbeId::WindowsRegistry => Arc::new(windows_registry::WindowsRegistryProbe),
        ProbeId::InstallMarkers => Arc::new(install_markers::InstallMarkersProbe),
        ProbeId::PackageManager => Arc::new(package_manager::PackageManagerProbe),
        ProbeId::Tasklist => Arc::new(processes::TasklistProbe),
        ProbeId::CimProcesses => Arc::new(processes::CimProcessesProbe),
        ProbeId::Ps => Arc::new(processes::PsProbe),
        ProbeId::SysinfoProcesses => Arc::new(processes::SysinfoProcessesProbe),
    }
}

/// Parse a four-digit hexadecimal USB identifier
pub(crate) fn parse_hex_id(s: &str) -> Option<u16> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(s, 16).ok()
}
