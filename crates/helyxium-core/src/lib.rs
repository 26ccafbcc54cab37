//! Helyxium Core - Detection data model, catalogs, and the snapshot cache
//!
//! This crate provides the foundational types for the Helyxium system:
//! - Raw probe evidence, probe outcomes, and per-record diagnostics
//! - Device and platform records built from that evidence
//! - Static catalogs of VR hardware USB IDs and platform process names
//! - Snapshots, diffs, and the hysteresis-aware snapshot cache

pub mod cache;
pub mod catalog;
pub mod device;
pub mod diff;
pub mod finding;
pub mod platform;
pub mod snapshot;

pub use cache::{CacheError, CacheState, SnapshotCache, Tracked};
pub use device::{
    Capability, DeviceKey, DeviceKind, DeviceRecord, DisplaySpecs, TrackingTechnology, UsbId,
    Vendor,
};
pub use diff::{Change, Diff, EntityDiff};
pub use finding::{
    Confidence, Evidence, ProbeError, ProbeId, ProbeOutcome, ProbeReport, RawFinding,
    RecordDiagnostics, UnknownProbe,
};
pub use platform::{DetectionMethod, PlatformId, PlatformRecord};
pub use snapshot::{
    CapabilitiesSummary, CycleReport, PendingRemoval, Snapshot, Target, TargetReport, TargetStatus,
};
