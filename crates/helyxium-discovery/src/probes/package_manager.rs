//! Linux package manager queries
//!
//! Linux VR stacks (Monado, ALVR, WiVRn) ship through distribution packages,
//! Flatpak, or Snap rather than a vendor installer.

use async_trait::async_trait;
use helyxium_core::{DetectionMethod, Evidence, PlatformId, ProbeError, ProbeId, ProbeReport};
use tracing::debug;

use super::Probe;
use crate::context::{on_path, run_command, ProbeContext};

/// Package names (lowercase) that identify a platform
const PACKAGES: &[(&str, PlatformId)] = &[
    ("monado", PlatformId::Monado),
    ("monado-service", PlatformId::Monado),
    ("libmonado", PlatformId::Monado),
    ("org.freedesktop.monado", PlatformId::Monado),
    ("alvr", PlatformId::Alvr),
    ("alvr-bin", PlatformId::Alvr),
    ("alvr-git", PlatformId::Alvr),
    ("com.valvesoftware.steam.utility.alvr", PlatformId::Alvr),
    ("wivrn", PlatformId::Wivrn),
    ("wivrn-server", PlatformId::Wivrn),
    ("wivrn-dashboard", PlatformId::Wivrn),
    ("io.github.wivrn.wivrn", PlatformId::Wivrn),
];

/// A package manager and the listing that enumerates installed packages
struct Manager {
    program: &'static str,
    args: &'static [&'static str],
    header: bool,
}

const MANAGERS: &[Manager] = &[
    Manager {
        program: "flatpak",
        args: &["list", "--columns=application,version"],
        header: false,
    },
    Manager {
        program: "snap",
        args: &["list"],
        header: true,
    },
    Manager {
        program: "dpkg-query",
        args: &["-W", "-f=${Package}\t${Version}\n"],
        header: false,
    },
    Manager {
        program: "pacman",
        args: &["-Q"],
        header: false,
    },
    Manager {
        program: "rpm",
        args: &["-qa", "--queryformat", "%{NAME}\t%{VERSION}\n"],
        header: false,
    },
];

pub struct PackageManagerProbe;

#[async_trait]
impl Probe for PackageManagerProbe {
    fn id(&self) -> ProbeId {
        ProbeId::PackageManager
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let present: Vec<&Manager> = MANAGERS.iter().filter(|m| on_path(m.program)).collect();
        if present.is_empty() {
            return ProbeReport::failed(ProbeError::Unavailable(
                "no supported package manager found".to_string(),
            ));
        }

        let mut findings = Vec::new();
        let mut failures = Vec::new();

        for manager in &present {
            match run_command(manager.program, manager.args, ctx.timeout).await {
                Ok(out) => {
                    let matched = match_packages(&parse_listing(&out, manager.header));
                    debug!(manager = manager.program, matched = matched.len(), "Package listing parsed");
                    findings.extend(matched);
                }
                Err(e) => {
                    debug!(manager = manager.program, error = %e, "Package listing failed");
                    failures.push(e);
                }
            }
        }

        ProbeReport::from_attempts(findings, present.len(), failures)
    }
}

/// Split a listing into `(name, version)` rows; the version column is optional
pub fn parse_listing(output: &str, header: bool) -> Vec<(String, Option<String>)> {
    output
        .lines()
        .skip(usize::from(header))
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let version = cols.next().map(str::to_string);
            Some((name.to_string(), version))
        })
        .collect()
}

/// Evidence for every listed package that belongs to a known platform
pub fn match_packages(rows: &[(String, Option<String>)]) -> Vec<Evidence> {
    rows.iter()
        .filter_map(|(name, version)| {
            let lower = name.to_lowercase();
            let platform = PACKAGES
                .iter()
                .find(|(pkg, _)| *pkg == lower)
                .map(|(_, platform)| *platform)?;
            Some(Evidence::PlatformInstall {
                platform,
                install_path: None,
                version: version.clone(),
                method: DetectionMethod::PackageManager,
            })
        })
        .collect()
}
