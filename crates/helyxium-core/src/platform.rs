//! VR software ecosystem records

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::finding::{Confidence, ProbeId, RecordDiagnostics};

/// Known VR runtimes, stores, and applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformId {
    SteamVr,
    OculusPc,
    WindowsMixedReality,
    VrChat,
    RecRoom,
    Viveport,
    VarjoBase,
    PicoConnect,
    PlaystationVr,
    Monado,
    Alvr,
    Wivrn,
}

impl PlatformId {
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformId::SteamVr => "SteamVR",
            PlatformId::OculusPc => "Meta Quest Link (Oculus PC)",
            PlatformId::WindowsMixedReality => "Windows Mixed Reality",
            PlatformId::VrChat => "VRChat",
            PlatformId::RecRoom => "Rec Room",
            PlatformId::Viveport => "Viveport",
            PlatformId::VarjoBase => "Varjo Base",
            PlatformId::PicoConnect => "Pico Connect",
            PlatformId::PlaystationVr => "PlayStation VR",
            PlatformId::Monado => "Monado",
            PlatformId::Alvr => "ALVR",
            PlatformId::Wivrn => "WiVRn",
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Technique that located a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Registry,
    Process,
    Filesystem,
    PackageManager,
}

impl DetectionMethod {
    /// Confidence carried by an install located with this method
    pub fn confidence(&self) -> Confidence {
        match self {
            DetectionMethod::Registry | DetectionMethod::PackageManager => Confidence::Exact,
            DetectionMethod::Filesystem => Confidence::Partial,
            DetectionMethod::Process => Confidence::Heuristic,
        }
    }
}

/// One installed or running VR platform as seen in a refresh cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub platform_id: PlatformId,
    pub install_path: Option<PathBuf>,
    /// Located by registry, filesystem, or package manager
    pub installed: bool,
    /// A process-listing probe saw one of the platform's processes this cycle
    pub running: bool,
    pub version: Option<String>,
    pub detection_method: DetectionMethod,
    pub confidence: Confidence,
    pub source_probes: BTreeSet<ProbeId>,
    /// VR titles installed through this platform's library
    #[serde(default)]
    pub supported_titles: BTreeSet<String>,
    /// Probes of the platform chain that failed this cycle
    #[serde(default)]
    pub diagnostics: RecordDiagnostics,
}

impl PlatformRecord {
    /// Compare the observed platform state, ignoring diagnostics and
    /// evidence provenance
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.platform_id == other.platform_id
            && self.install_path == other.install_path
            && self.installed == other.installed
            && self.running == other.running
            && self.version == other.version
            && self.supported_titles == other.supported_titles
    }

    /// Installed but not currently active
    pub fn is_idle_install(&self) -> bool {
        self.installed && !self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_confidence() {
        assert_eq!(DetectionMethod::Registry.confidence(), Confidence::Exact);
        assert_eq!(DetectionMethod::Filesystem.confidence(), Confidence::Partial);
        assert_eq!(DetectionMethod::Process.confidence(), Confidence::Heuristic);
    }

    #[test]
    fn test_platform_id_serializes_snake_case() {
        let json = serde_json::to_string(&PlatformId::SteamVr).unwrap();
        assert_eq!(json, "\"steam_vr\"");
    }
}
