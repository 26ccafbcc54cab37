//! Raw probe evidence, probe outcomes, and per-record diagnostics

use crate::platform::{DetectionMethod, PlatformId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a single detection technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeId {
    /// Linux `/sys/bus/usb/devices` walk
    SysfsUsb,
    /// Linux `lsusb` output
    Lsusb,
    /// Windows `Get-PnpDevice` query
    PnpDevices,
    /// Windows `pnputil /enum-devices`
    Pnputil,
    /// macOS `system_profiler SPUSBDataType`
    SystemProfilerUsb,
    /// Windows registry install keys
    WindowsRegistry,
    /// Known install directories and application bundles
    InstallMarkers,
    /// Linux package managers (flatpak, snap, dpkg, pacman, rpm)
    PackageManager,
    /// Windows `tasklist`
    Tasklist,
    /// Windows management instrumentation process query
    CimProcesses,
    /// Unix `ps`
    Ps,
    /// In-process enumeration through the sysinfo crate
    SysinfoProcesses,
}

impl ProbeId {
    pub const ALL: [ProbeId; 12] = [
        ProbeId::SysfsUsb,
        ProbeId::Lsusb,
        ProbeId::PnpDevices,
        ProbeId::Pnputil,
        ProbeId::SystemProfilerUsb,
        ProbeId::WindowsRegistry,
        ProbeId::InstallMarkers,
        ProbeId::PackageManager,
        ProbeId::Tasklist,
        ProbeId::CimProcesses,
        ProbeId::Ps,
        ProbeId::SysinfoProcesses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeId::SysfsUsb => "sysfs_usb",
            ProbeId::Lsusb => "lsusb",
            ProbeId::PnpDevices => "pnp_devices",
            ProbeId::Pnputil => "pnputil",
            ProbeId::SystemProfilerUsb => "system_profiler_usb",
            ProbeId::WindowsRegistry => "windows_registry",
            ProbeId::InstallMarkers => "install_markers",
            ProbeId::PackageManager => "package_manager",
            ProbeId::Tasklist => "tasklist",
            ProbeId::CimProcesses => "cim_processes",
            ProbeId::Ps => "ps",
            ProbeId::SysinfoProcesses => "sysinfo_processes",
        }
    }

    /// Whether this probe enumerates running processes
    pub fn is_process_listing(&self) -> bool {
        matches!(
            self,
            ProbeId::Tasklist | ProbeId::CimProcesses | ProbeId::Ps | ProbeId::SysinfoProcesses
        )
    }
}

impl std::fmt::Display for ProbeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeId {
    type Err = UnknownProbe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProbeId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownProbe(s.to_string()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown probe identifier: {0}")]
pub struct UnknownProbe(pub String);

/// How strongly a piece of evidence identifies an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Name or pattern match only
    Heuristic,
    /// Vendor known, model inferred
    Partial,
    /// Exact identifier match (USB vendor/product, registry install key)
    Exact,
}

/// Unstructured evidence reported by a probe
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    /// A USB vendor/product pair seen on a bus
    Usb {
        vendor_id: u16,
        product_id: u16,
        product: Option<String>,
        serial: Option<String>,
    },
    /// A device friendly name (PnP, system profiler)
    DeviceName { name: String },
    /// A running process image name
    Process { name: String },
    /// An installed VR platform located by registry, filesystem, or package manager
    PlatformInstall {
        platform: PlatformId,
        install_path: Option<PathBuf>,
        version: Option<String>,
        method: DetectionMethod,
    },
    /// VR titles found in an installed platform's library
    PlatformTitles {
        platform: PlatformId,
        titles: Vec<String>,
    },
}

/// Evidence stamped with the probe that produced it and that probe's chain rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFinding {
    pub probe: ProbeId,
    /// Position of the probe in its registry chain (0 = most authoritative)
    pub rank: usize,
    pub evidence: Evidence,
}

impl RawFinding {
    pub fn new(probe: ProbeId, rank: usize, evidence: Evidence) -> Self {
        Self {
            probe,
            rank,
            evidence,
        }
    }
}

/// Result classification of a single probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    PartialSuccess(String),
    Unavailable(String),
    PermissionDenied,
    Timeout,
    MalformedData(String),
}

impl ProbeOutcome {
    /// True when the probe produced usable evidence (possibly incomplete)
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success | ProbeOutcome::PartialSuccess(_))
    }

    /// True when the probe contributed nothing this cycle
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

/// Failure modes a probe can hit internally
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed data: {0}")]
    MalformedData(String),
}

impl From<ProbeError> for ProbeOutcome {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Unavailable(reason) => ProbeOutcome::Unavailable(reason),
            ProbeError::PermissionDenied(_) => ProbeOutcome::PermissionDenied,
            ProbeError::Timeout(_) => ProbeOutcome::Timeout,
            ProbeError::MalformedData(reason) => ProbeOutcome::MalformedData(reason),
        }
    }
}

/// What a probe hands back to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub findings: Vec<Evidence>,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    pub fn success(findings: Vec<Evidence>) -> Self {
        Self {
            findings,
            outcome: ProbeOutcome::Success,
        }
    }

    pub fn failed(err: ProbeError) -> Self {
        Self {
            findings: Vec::new(),
            outcome: err.into(),
        }
    }

    pub fn from_result(result: Result<Vec<Evidence>, ProbeError>) -> Self {
        match result {
            Ok(findings) => Self::success(findings),
            Err(err) => Self::failed(err),
        }
    }

    /// Combine the results of a probe that performs several independent queries.
    ///
    /// All queries succeeded: `Success`. Some failed: `PartialSuccess` listing the
    /// failures. All failed: the most specific failure, preferring permission
    /// problems over timeouts over everything else.
    pub fn from_attempts(findings: Vec<Evidence>, attempts: usize, failures: Vec<ProbeError>) -> Self {
        if failures.is_empty() {
            return Self::success(findings);
        }

        if failures.len() < attempts || !findings.is_empty() {
            let reason = failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Self {
                findings,
                outcome: ProbeOutcome::PartialSuccess(reason),
            };
        }

        let chosen = failures
            .iter()
            .find(|e| matches!(e, ProbeError::PermissionDenied(_)))
            .or_else(|| failures.iter().find(|e| matches!(e, ProbeError::Timeout(_))))
            .or_else(|| failures.first())
            .cloned()
            .unwrap_or_else(|| ProbeError::Unavailable("no queries attempted".to_string()));

        Self::failed(chosen)
    }
}

/// Evidence sources that failed while a record was being built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiagnostics {
    pub missing_sources: BTreeMap<ProbeId, ProbeOutcome>,
}

impl RecordDiagnostics {
    /// True when every probe of the record's chain reported in
    pub fn is_complete(&self) -> bool {
        self.missing_sources.is_empty()
    }
}
