//! Device types for tracking detected VR hardware

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::finding::{Confidence, ProbeId, RecordDiagnostics};

/// Identity key for a physical device, derived from vendor and model signature
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey(pub String);

impl DeviceKey {
    /// Build a key from a vendor and a free-form model string
    pub fn new(vendor: Vendor, model: &str) -> Self {
        Self(format!("{}/{}", vendor.as_str(), slugify(model)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase, alphanumeric runs joined by single dashes
pub fn slugify(model: &str) -> String {
    let mut slug = String::with_capacity(model.len());
    for c in model.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("unknown");
    }
    slug
}

/// Kind of physical VR component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Headset,
    Controller,
    TrackingBaseStation,
    /// VR vendor hardware whose role is not catalogued
    Unknown,
}

/// Hardware vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Meta,
    Htc,
    Valve,
    Sony,
    Microsoft,
    Apple,
    Pico,
    Varjo,
    Unknown,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Meta => "meta",
            Vendor::Htc => "htc",
            Vendor::Valve => "valve",
            Vendor::Sony => "sony",
            Vendor::Microsoft => "microsoft",
            Vendor::Apple => "apple",
            Vendor::Pico => "pico",
            Vendor::Varjo => "varjo",
            Vendor::Unknown => "unknown",
        }
    }
}

/// How the headset tracks its pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingTechnology {
    InsideOut,
    Lighthouse,
    OutsideIn,
    Unknown,
}

/// Optional hardware feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    HandTracking,
    EyeTracking,
    Passthrough,
    Wireless,
}

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Published display characteristics of a headset model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DisplaySpecs {
    pub max_refresh_hz: u16,
    pub resolution_per_eye: [u32; 2],
    pub fov_horizontal_deg: u16,
}

/// One physical VR component as seen in a refresh cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub key: DeviceKey,
    pub kind: DeviceKind,
    pub vendor: Vendor,
    /// Best-effort model name
    pub model: String,
    pub tracking: TrackingTechnology,
    pub capabilities: BTreeSet<Capability>,
    /// Probes that contributed evidence for this record
    pub source_probes: BTreeSet<ProbeId>,
    pub confidence: Confidence,
    pub serial: Option<String>,
    pub usb_id: Option<UsbId>,
    pub specs: Option<DisplaySpecs>,
    /// Probes of the hardware chain that failed this cycle
    #[serde(default)]
    pub diagnostics: RecordDiagnostics,
}

impl DeviceRecord {
    /// Compare the observed device, ignoring diagnostics and which probes
    /// happened to corroborate it this cycle
    pub fn same_attributes(&self, other: &Self) -> bool {
        self.key == other.key
            && self.kind == other.kind
            && self.vendor == other.vendor
            && self.model == other.model
            && self.tracking == other.tracking
            && self.capabilities == other.capabilities
            && self.serial == other.serial
            && self.usb_id == other.usb_id
            && self.specs == other.specs
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Ranking for picking the primary headset: thousands of pixels per eye
    /// plus refresh rate and horizontal FOV, plus a bonus per feature
    pub fn primary_score(&self) -> u32 {
        let display = self.specs.map_or(0, |s| {
            s.resolution_per_eye[0] * s.resolution_per_eye[1] / 1000
                + u32::from(s.max_refresh_hz)
                + u32::from(s.fov_horizontal_deg)
        });
        let features: u32 = self
            .capabilities
            .iter()
            .map(|c| match c {
                Capability::HandTracking => 50,
                Capability::EyeTracking => 100,
                Capability::Passthrough => 75,
                Capability::Wireless => 25,
            })
            .sum();
        display + features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Quest 3"), "quest-3");
        assert_eq!(slugify("  Vive Pro 2 "), "vive-pro-2");
        assert_eq!(slugify("Index (HMD)"), "index-hmd");
        assert_eq!(slugify("!!"), "unknown");
    }

    #[test]
    fn test_device_key_from_vendor_and_model() {
        let key = DeviceKey::new(Vendor::Meta, "Quest 3");
        assert_eq!(key.as_str(), "meta/quest-3");
        assert_eq!(key, DeviceKey::new(Vendor::Meta, "quest-3"));
    }

    #[test]
    fn test_usb_id_display() {
        let id = UsbId {
            vendor_id: 0x2833,
            product_id: 0x0204,
        };
        assert_eq!(id.to_string(), "2833:0204");
    }
}
