//! Changes between two consecutive snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceRecord;
use crate::platform::PlatformRecord;
use crate::snapshot::Target;

/// An entity present in both snapshots whose attributes differ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// Added, removed, and changed entities of one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub changed: Vec<Change<T>>,
}

impl<T> Default for EntityDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }
}

impl<T> EntityDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

/// Result of one refresh cycle relative to the previous one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Snapshot this diff leads to
    pub snapshot_id: Uuid,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub devices: EntityDiff<DeviceRecord>,
    pub platforms: EntityDiff<PlatformRecord>,
    /// Some probe failed this cycle
    pub degraded: bool,
    /// Targets whose entire chain failed; their entities were held unchanged
    pub no_evidence: Vec<Target>,
}

impl Diff {
    /// No entity was added, removed, or changed
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.platforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len() + self.platforms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_diff_counts() {
        let mut diff: EntityDiff<u32> = EntityDiff::default();
        assert!(diff.is_empty());
        diff.added.push(1);
        diff.changed.push(Change { old: 2, new: 3 });
        assert_eq!(diff.len(), 2);
        assert!(!diff.is_empty());
    }
}
