//! Windows registry install keys, queried through `reg query`
//!
//! 32-bit installers on 64-bit Windows write under `WOW6432Node`, so every
//! machine-wide key is listed in both views.

use async_trait::async_trait;
use helyxium_core::{DetectionMethod, Evidence, PlatformId, ProbeError, ProbeId, ProbeReport};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

use super::Probe;
use crate::context::{capture_command, classify_failure, CommandOutput, ProbeContext};

/// How a key's values locate a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Locate {
    /// Value holds the install directory
    InstallValue(&'static str),
    /// Uninstall entry with `InstallLocation` and `DisplayVersion`
    Uninstall,
    /// Value holds the Steam root; SteamVR is a library app under it
    SteamRoot(&'static str),
    /// The key existing is the signal
    KeyPresence,
}

const KEYS: &[(PlatformId, &str, Locate)] = &[
    (
        PlatformId::SteamVr,
        r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall\Steam App 250820",
        Locate::Uninstall,
    ),
    (
        PlatformId::SteamVr,
        r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall\Steam App 250820",
        Locate::Uninstall,
    ),
    (PlatformId::SteamVr, r"HKCU\Software\Valve\Steam", Locate::SteamRoot("SteamPath")),
    (PlatformId::SteamVr, r"HKLM\SOFTWARE\Valve\Steam", Locate::SteamRoot("InstallPath")),
    (
        PlatformId::SteamVr,
        r"HKLM\SOFTWARE\WOW6432Node\Valve\Steam",
        Locate::SteamRoot("InstallPath"),
    ),
    (PlatformId::OculusPc, r"HKLM\SOFTWARE\Oculus VR, LLC\Oculus", Locate::InstallValue("Base")),
    (
        PlatformId::OculusPc,
        r"HKLM\SOFTWARE\WOW6432Node\Oculus VR, LLC\Oculus",
        Locate::InstallValue("Base"),
    ),
    (PlatformId::OculusPc, r"HKCU\Software\Oculus VR, LLC\Oculus", Locate::InstallValue("Base")),
    (PlatformId::OculusPc, r"HKLM\SOFTWARE\Meta\Oculus", Locate::InstallValue("InstallPath")),
    (
        PlatformId::OculusPc,
        r"HKLM\SOFTWARE\WOW6432Node\Meta\Oculus",
        Locate::InstallValue("InstallPath"),
    ),
    (
        PlatformId::WindowsMixedReality,
        r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Holographic",
        Locate::KeyPresence,
    ),
    (
        PlatformId::WindowsMixedReality,
        r"HKLM\SOFTWARE\Microsoft\MixedReality",
        Locate::KeyPresence,
    ),
];

pub struct WindowsRegistryProbe;

#[async_trait]
impl Probe for WindowsRegistryProbe {
    fn id(&self) -> ProbeId {
        ProbeId::WindowsRegistry
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let mut findings = Vec::new();
        let mut failures = Vec::new();

        for (platform, key, locate) in KEYS {
            match query_key(key, ctx.timeout).await {
                Ok(Some(values)) => {
                    if let Some(evidence) = interpret(*platform, *locate, &values).await {
                        findings.push(evidence);
                    }
                }
                Ok(None) => trace!(key, "Registry key absent"),
                Err(e) => {
                    debug!(key, error = %e, "Registry query failed");
                    failures.push(e);
                }
            }
        }

        ProbeReport::from_attempts(findings, KEYS.len(), failures)
    }
}

/// Values of a key, or `None` when the key does not exist
async fn query_key(key: &str, timeout: Duration) -> Result<Option<BTreeMap<String, String>>, ProbeError> {
    let output = capture_command("reg", &["query", key], timeout).await?;
    interpret_output(&output)
}

/// `reg` exits 1 with nothing on stdout when a key is missing. Its stderr
/// text is localized, so only the exit status decides absence.
fn interpret_output(output: &CommandOutput) -> Result<Option<BTreeMap<String, String>>, ProbeError> {
    if output.success {
        return Ok(Some(parse_reg_query(&output.stdout)));
    }
    match classify_failure("reg", &output.stderr) {
        denied @ ProbeError::PermissionDenied(_) => Err(denied),
        _ if output.code == Some(1) && output.stdout.trim().is_empty() => Ok(None),
        other => Err(other),
    }
}

/// Parse `reg query` value lines: `    Name    REG_SZ    data`
pub fn parse_reg_query(output: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in output.lines() {
        if !line.starts_with(' ') {
            continue;
        }
        let Some(idx) = line.find("REG_") else {
            continue;
        };
        let name = line[..idx].trim();
        let rest = &line[idx..];
        let data = rest
            .split_once(char::is_whitespace)
            .map(|(_, data)| data.trim())
            .unwrap_or("");
        if !name.is_empty() {
            values.insert(name.to_string(), data.to_string());
        }
    }
    values
}

async fn interpret(
    platform: PlatformId,
    locate: Locate,
    values: &BTreeMap<String, String>,
) -> Option<Evidence> {
    let non_empty = |name: &str| values.get(name).filter(|v| !v.is_empty()).cloned();

    let (install_path, version) = match locate {
        Locate::InstallValue(name) => (Some(PathBuf::from(non_empty(name)?)), None),
        Locate::Uninstall => (
            non_empty("InstallLocation").map(PathBuf::from),
            non_empty("DisplayVersion"),
        ),
        Locate::SteamRoot(name) => {
            let runtime = steamvr_under(Path::new(&non_empty(name)?));
            if !tokio::fs::try_exists(&runtime).await.unwrap_or(false) {
                return None;
            }
            (Some(runtime), None)
        }
        Locate::KeyPresence => (None, None),
    };

    Some(Evidence::PlatformInstall {
        platform,
        install_path,
        version,
        method: DetectionMethod::Registry,
    })
}

/// SteamVR's location inside a Steam library root
pub fn steamvr_under(steam_root: &Path) -> PathBuf {
    steam_root.join("steamapps").join("common").join("SteamVR")
}
