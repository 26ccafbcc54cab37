//! Snapshot cache and diff engine
//!
//! The cache owns the current published snapshot. Each new observation is
//! reconciled against it to produce the next snapshot and the diff between
//! the two. Entities that vanish are carried forward in a pending-removal
//! state and only reported as removed after they have been missing for
//! `hysteresis_cycles` consecutive cycles:
//! - a single flaky cycle never produces a removed+added pair
//! - an entity that reappears inside the window is compared against the
//!   held record, exactly as if it had never left
//! - a target whose entire probe chain failed does not advance miss counters

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::device::{DeviceKey, DeviceRecord};
use crate::diff::{Change, Diff, EntityDiff};
use crate::platform::{PlatformId, PlatformRecord};
use crate::snapshot::{PendingRemoval, Snapshot};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("hysteresis window must be at least one cycle")]
    ZeroHysteresis,
}

/// An entity the cache tracks across cycles
pub trait Tracked: Clone {
    type Key: Ord + Clone + Debug;

    fn key(&self) -> Self::Key;

    /// Equality of observed attributes, ignoring per-cycle diagnostics and
    /// which probes supplied the evidence
    fn same_attributes(&self, other: &Self) -> bool;
}

impl Tracked for DeviceRecord {
    type Key = DeviceKey;

    fn key(&self) -> DeviceKey {
        self.key.clone()
    }

    fn same_attributes(&self, other: &Self) -> bool {
        DeviceRecord::same_attributes(self, other)
    }
}

impl Tracked for PlatformRecord {
    type Key = PlatformId;

    fn key(&self) -> PlatformId {
        self.platform_id
    }

    fn same_attributes(&self, other: &Self) -> bool {
        PlatformRecord::same_attributes(self, other)
    }
}

/// Whether a snapshot has been published yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Populated,
}

/// Single-writer holder of the current snapshot
#[derive(Debug)]
pub struct SnapshotCache {
    hysteresis_cycles: u32,
    current: Option<Arc<Snapshot>>,
}

impl SnapshotCache {
    pub fn new(hysteresis_cycles: u32) -> Result<Self, CacheError> {
        if hysteresis_cycles == 0 {
            return Err(CacheError::ZeroHysteresis);
        }
        Ok(Self {
            hysteresis_cycles,
            current: None,
        })
    }

    pub fn state(&self) -> CacheState {
        if self.current.is_some() {
            CacheState::Populated
        } else {
            CacheState::Empty
        }
    }

    pub fn hysteresis_cycles(&self) -> u32 {
        self.hysteresis_cycles
    }

    /// Last published snapshot, if any cycle has completed
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.clone()
    }

    /// Reconcile a freshly observed snapshot, publish it, and return the diff
    pub fn apply(&mut self, mut observed: Snapshot) -> (Arc<Snapshot>, Diff) {
        let hold_devices = observed.report.hardware.is_no_evidence();
        let hold_platforms = observed.report.platforms.is_no_evidence();
        let previous = self.current.take();

        let devices = reconcile(
            previous
                .as_deref()
                .map(|p| (&p.devices, &p.pending_removal.devices)),
            std::mem::take(&mut observed.devices),
            hold_devices,
            self.hysteresis_cycles,
        );
        let platforms = reconcile(
            previous
                .as_deref()
                .map(|p| (&p.platforms, &p.pending_removal.platforms)),
            std::mem::take(&mut observed.platforms),
            hold_platforms,
            self.hysteresis_cycles,
        );

        observed.devices = devices.entities;
        observed.platforms = platforms.entities;
        observed.pending_removal = PendingRemoval {
            devices: devices.pending,
            platforms: platforms.pending,
        };

        let diff = Diff {
            snapshot_id: observed.id,
            cycle: observed.cycle,
            timestamp: observed.timestamp,
            devices: devices.diff,
            platforms: platforms.diff,
            degraded: observed.report.is_degraded(),
            no_evidence: observed.report.no_evidence_targets(),
        };

        debug!(
            cycle = observed.cycle,
            devices = observed.devices.len(),
            platforms = observed.platforms.len(),
            changes = diff.len(),
            pending = observed.pending_removal.devices.len() + observed.pending_removal.platforms.len(),
            "Snapshot published"
        );

        let snapshot = Arc::new(observed);
        self.current = Some(snapshot.clone());
        (snapshot, diff)
    }
}

struct Reconciled<T: Tracked> {
    entities: BTreeMap<T::Key, T>,
    pending: BTreeMap<T::Key, u32>,
    diff: EntityDiff<T>,
}

fn reconcile<T: Tracked>(
    previous: Option<(&BTreeMap<T::Key, T>, &BTreeMap<T::Key, u32>)>,
    mut observed: BTreeMap<T::Key, T>,
    hold: bool,
    threshold: u32,
) -> Reconciled<T> {
    let mut diff = EntityDiff::default();
    let mut pending = BTreeMap::new();

    let Some((prev_entities, prev_pending)) = previous else {
        diff.added = observed.values().cloned().collect();
        return Reconciled {
            entities: observed,
            pending,
            diff,
        };
    };

    for (key, new) in &observed {
        match prev_entities.get(key) {
            Some(old) if !old.same_attributes(new) => diff.changed.push(Change {
                old: old.clone(),
                new: new.clone(),
            }),
            Some(_) => {}
            None => diff.added.push(new.clone()),
        }
    }

    let mut held = Vec::new();
    for (key, old) in prev_entities {
        if observed.contains_key(key) {
            continue;
        }

        let previous_misses = prev_pending.get(key).copied().unwrap_or(0);
        let misses = if hold { previous_misses } else { previous_misses + 1 };

        if misses >= threshold {
            debug!(key = ?key, misses, "Entity removed after hysteresis window");
            diff.removed.push(old.clone());
        } else {
            if misses > 0 {
                pending.insert(key.clone(), misses);
            }
            held.push((key.clone(), old.clone()));
        }
    }

    observed.extend(held);

    Reconciled {
        entities: observed,
        pending,
        diff,
    }
}
