//! Probe registry: (target, OS) to ordered probe chain
//!
//! Adding an OS or a technique is one line in [`CHAINS`]. Chain position is
//! the probe's rank, which breaks confidence ties during merge.

use helyxium_core::{ProbeId, Target};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::Os;
use crate::error::DiscoveryError;
use crate::probes::{self, Probe};

const CHAINS: &[(Target, Os, &[ProbeId])] = &[
    (Target::Hardware, Os::Linux, &[ProbeId::SysfsUsb, ProbeId::Lsusb]),
    (Target::Hardware, Os::Windows, &[ProbeId::PnpDevices, ProbeId::Pnputil]),
    (Target::Hardware, Os::Macos, &[ProbeId::SystemProfilerUsb]),
    (
        Target::Platforms,
        Os::Linux,
        &[
            ProbeId::PackageManager,
            ProbeId::InstallMarkers,
            ProbeId::Ps,
            ProbeId::SysinfoProcesses,
        ],
    ),
    (
        Target::Platforms,
        Os::Windows,
        &[
            ProbeId::WindowsRegistry,
            ProbeId::InstallMarkers,
            ProbeId::Tasklist,
            ProbeId::CimProcesses,
            ProbeId::SysinfoProcesses,
        ],
    ),
    (
        Target::Platforms,
        Os::Macos,
        &[ProbeId::InstallMarkers, ProbeId::Ps, ProbeId::SysinfoProcesses],
    ),
];

/// Probes switched off per operating system
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeToggles {
    disabled: BTreeMap<Os, BTreeSet<ProbeId>>,
}

impl ProbeToggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&mut self, os: Os, probe: ProbeId) {
        self.disabled.entry(os).or_default().insert(probe);
    }

    /// Disable probes given by their configuration names
    pub fn disable_named<S: AsRef<str>>(&mut self, os: Os, names: &[S]) -> Result<(), DiscoveryError> {
        for name in names {
            self.disable(os, name.as_ref().parse()?);
        }
        Ok(())
    }

    pub fn is_enabled(&self, os: Os, probe: ProbeId) -> bool {
        !self
            .disabled
            .get(&os)
            .is_some_and(|set| set.contains(&probe))
    }
}

/// A probe together with its declared chain position
#[derive(Clone)]
pub struct ChainEntry {
    pub rank: usize,
    pub probe: Arc<dyn Probe>,
}

/// Ordered probes for one target
#[derive(Clone)]
pub struct ProbeChain {
    pub target: Target,
    pub entries: Vec<ChainEntry>,
}

impl ProbeChain {
    pub fn ids(&self) -> Vec<ProbeId> {
        self.entries.iter().map(|e| e.probe.id()).collect()
    }
}

/// Both chains for one host
#[derive(Clone)]
pub struct ResolvedChains {
    pub os: Os,
    pub hardware: ProbeChain,
    pub platforms: ProbeChain,
}

impl ResolvedChains {
    pub fn chain(&self, target: Target) -> &ProbeChain {
        match target {
            Target::Hardware => &self.hardware,
            Target::Platforms => &self.platforms,
        }
    }
}

pub struct ProbeRegistry;

impl ProbeRegistry {
    /// Declared chain before any toggles apply
    pub fn declared(target: Target, os: Os) -> &'static [ProbeId] {
        CHAINS
            .iter()
            .find(|(t, o, _)| *t == target && *o == os)
            .map(|(_, _, chain)| *chain)
            .unwrap_or(&[])
    }

    /// Chains for the OS this binary runs on
    pub fn resolve_host(toggles: &ProbeToggles) -> Result<ResolvedChains, DiscoveryError> {
        let os = Os::host().ok_or_else(|| DiscoveryError::UnsupportedOs(std::env::consts::OS.to_string()))?;
        Self::resolve(os, toggles)
    }

    pub fn resolve(os: Os, toggles: &ProbeToggles) -> Result<ResolvedChains, DiscoveryError> {
        Self::resolve_with(os, toggles, probes::build)
    }

    /// Resolve with a custom probe factory
    pub fn resolve_with<F>(os: Os, toggles: &ProbeToggles, factory: F) -> Result<ResolvedChains, DiscoveryError>
    where
        F: Fn(ProbeId) -> Arc<dyn Probe>,
    {
        let build_chain = |target: Target| -> Result<ProbeChain, DiscoveryError> {
            let entries: Vec<ChainEntry> = Self::declared(target, os)
                .iter()
                .enumerate()
                .filter(|(_, id)| {
                    let enabled = toggles.is_enabled(os, **id);
                    if !enabled {
                        debug!(probe = %id, %os, "Probe disabled by configuration");
                    }
                    enabled
                })
                .map(|(rank, id)| ChainEntry {
                    rank,
                    probe: factory(*id),
                })
                .collect();

            if entries.is_empty() {
                return Err(DiscoveryError::EmptyChain { target, os });
            }
            Ok(ProbeChain { target, entries })
        };

        let resolved = ResolvedChains {
            os,
            hardware: build_chain(Target::Hardware)?,
            platforms: build_chain(Target::Platforms)?,
        };

        info!(
            %os,
            hardware = ?resolved.hardware.ids(),
            platforms = ?resolved.platforms.ids(),
            "Probe chains resolved"
        );
        Ok(resolved)
    }
}
