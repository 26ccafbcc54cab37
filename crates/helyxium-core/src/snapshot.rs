//! Detection snapshots and per-cycle diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::device::{Capability, DeviceKey, DeviceKind, DeviceRecord};
use crate::finding::{ProbeId, ProbeOutcome};
use crate::platform::{PlatformId, PlatformRecord};

/// What a probe chain is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Hardware,
    Platforms,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Hardware => write!(f, "hardware"),
            Target::Platforms => write!(f, "platforms"),
        }
    }
}

/// Overall result of one target's probe chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// At least one record was produced
    Detected,
    /// Probes ran successfully and found nothing
    NothingDetected,
    /// Every probe of the chain failed; absence of records says nothing
    NoEvidence,
}

/// Outcome of every probe attempted for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    pub status: TargetStatus,
    pub outcomes: BTreeMap<ProbeId, ProbeOutcome>,
    pub records: usize,
}

impl TargetReport {
    pub fn new(target: Target, outcomes: BTreeMap<ProbeId, ProbeOutcome>, records: usize) -> Self {
        let any_success = outcomes.values().any(ProbeOutcome::is_success);
        let status = if !any_success {
            TargetStatus::NoEvidence
        } else if records == 0 {
            TargetStatus::NothingDetected
        } else {
            TargetStatus::Detected
        };
        Self {
            target,
            status,
            outcomes,
            records,
        }
    }

    /// Report for a target before any cycle has run
    pub fn pending(target: Target) -> Self {
        Self {
            target,
            status: TargetStatus::NothingDetected,
            outcomes: BTreeMap::new(),
            records: 0,
        }
    }

    /// Probes that produced no usable evidence
    pub fn failures(&self) -> BTreeMap<ProbeId, ProbeOutcome> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(id, outcome)| (*id, outcome.clone()))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.values().any(ProbeOutcome::is_failure)
    }

    pub fn is_no_evidence(&self) -> bool {
        self.status == TargetStatus::NoEvidence
    }
}

/// Diagnostics for one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub hardware: TargetReport,
    pub platforms: TargetReport,
}

impl CycleReport {
    pub fn pending() -> Self {
        Self {
            hardware: TargetReport::pending(Target::Hardware),
            platforms: TargetReport::pending(Target::Platforms),
        }
    }

    pub fn target(&self, target: Target) -> &TargetReport {
        match target {
            Target::Hardware => &self.hardware,
            Target::Platforms => &self.platforms,
        }
    }

    /// True when any probe of any chain failed
    pub fn is_degraded(&self) -> bool {
        self.hardware.has_failures() || self.platforms.has_failures()
    }

    /// Targets whose whole chain failed
    pub fn no_evidence_targets(&self) -> Vec<Target> {
        [&self.hardware, &self.platforms]
            .into_iter()
            .filter(|r| r.is_no_evidence())
            .map(|r| r.target)
            .collect()
    }
}

/// Entities currently missing but still inside the hysteresis window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRemoval {
    pub devices: BTreeMap<DeviceKey, u32>,
    pub platforms: BTreeMap<PlatformId, u32>,
}

impl PendingRemoval {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.platforms.is_empty()
    }
}

/// Best display characteristics and every feature across detected devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesSummary {
    /// Largest per-eye resolution by pixel count
    pub best_resolution_per_eye: Option<[u32; 2]>,
    pub highest_refresh_hz: Option<u16>,
    pub widest_fov_deg: Option<u16>,
    pub capabilities: BTreeSet<Capability>,
}

/// Complete detected state as of one refresh cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    /// Monotonic refresh-cycle counter (0 = nothing detected yet)
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub devices: BTreeMap<DeviceKey, DeviceRecord>,
    pub platforms: BTreeMap<PlatformId, PlatformRecord>,
    /// Held entities not seen this cycle, with their consecutive miss count
    #[serde(default)]
    pub pending_removal: PendingRemoval,
    pub report: CycleReport,
}

impl Snapshot {
    /// Snapshot as built by the orchestrator for one cycle
    pub fn new(
        cycle: u64,
        devices: BTreeMap<DeviceKey, DeviceRecord>,
        platforms: BTreeMap<PlatformId, PlatformRecord>,
        report: CycleReport,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cycle,
            timestamp: Utc::now(),
            devices,
            platforms,
            pending_removal: PendingRemoval::default(),
            report,
        }
    }

    /// Placeholder published before the first cycle completes
    pub fn empty() -> Self {
        Self::new(0, BTreeMap::new(), BTreeMap::new(), CycleReport::pending())
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&DeviceRecord> {
        self.devices.get(key)
    }

    pub fn platform(&self, id: PlatformId) -> Option<&PlatformRecord> {
        self.platforms.get(&id)
    }

    /// Platforms with a corroborated running process
    pub fn running_platforms(&self) -> impl Iterator<Item = &PlatformRecord> {
        self.platforms.values().filter(|p| p.running)
    }

    /// True when any VR device or platform is present
    pub fn is_vr_ready(&self) -> bool {
        !self.devices.is_empty() || self.platforms.values().any(|p| p.installed || p.running)
    }

    /// The headset to use when several are connected.
    ///
    /// Highest [`DeviceRecord::primary_score`] wins; ties go to the more
    /// confident record, then the lower key.
    pub fn primary_device(&self) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .filter(|d| d.kind == DeviceKind::Headset)
            .max_by(|a, b| {
                a.primary_score()
                    .cmp(&b.primary_score())
                    .then(a.confidence.cmp(&b.confidence))
                    .then_with(|| b.key.cmp(&a.key))
            })
    }

    pub fn capabilities_summary(&self) -> CapabilitiesSummary {
        let specs = || self.devices.values().filter_map(|d| d.specs);
        CapabilitiesSummary {
            best_resolution_per_eye: specs()
                .map(|s| s.resolution_per_eye)
                .max_by_key(|[w, h]| u64::from(*w) * u64::from(*h)),
            highest_refresh_hz: specs().map(|s| s.max_refresh_hz).max(),
            widest_fov_deg: specs().map(|s| s.fov_horizontal_deg).max(),
            capabilities: self
                .devices
                .values()
                .flat_map(|d| d.capabilities.iter().copied())
                .collect(),
        }
    }
}
