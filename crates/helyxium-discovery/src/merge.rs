//! Merge raw findings into canonical records
//!
//! Pure and synchronous. Findings are grouped by identity key and every group
//! is sorted by (confidence desc, registry rank asc, candidate content), so
//! the result never depends on the order probes happened to finish in.

use helyxium_core::catalog::{self, HardwareModel};
use helyxium_core::{
    Capability, Confidence, DetectionMethod, DeviceKey, DeviceKind, DeviceRecord, DisplaySpecs,
    Evidence, PlatformId, PlatformRecord, ProbeId, RawFinding, RecordDiagnostics,
    TrackingTechnology, UsbId, Vendor,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// One finding interpreted as evidence for a device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DeviceCandidate {
    confidence: Confidence,
    rank: usize,
    probe: ProbeId,
    key: DeviceKey,
    kind: DeviceKind,
    vendor: Vendor,
    model: String,
    tracking: TrackingTechnology,
    capabilities: BTreeSet<Capability>,
    specs: Option<DisplaySpecs>,
    serial: Option<String>,
    usb_id: Option<UsbId>,
}

impl DeviceCandidate {
    fn from_model(
        finding: &RawFinding,
        confidence: Confidence,
        model: &HardwareModel,
        serial: Option<String>,
        usb_id: Option<UsbId>,
    ) -> Self {
        Self {
            confidence,
            rank: finding.rank,
            probe: finding.probe,
            key: DeviceKey::new(model.vendor, model.model),
            kind: model.kind,
            vendor: model.vendor,
            model: model.model.to_string(),
            tracking: model.tracking,
            capabilities: model.capabilities.iter().copied().collect(),
            specs: model.specs,
            serial,
            usb_id,
        }
    }

    fn from_finding(finding: &RawFinding) -> Option<Self> {
        match &finding.evidence {
            Evidence::Usb {
                vendor_id,
                product_id,
                product,
                serial,
            } => {
                let usb_id = Some(UsbId {
                    vendor_id: *vendor_id,
                    product_id: *product_id,
                });
                let recognized = product.as_deref().and_then(catalog::recognize_model);

                if let Some(model) = catalog::lookup_usb(*vendor_id, *product_id) {
                    return Some(Self::from_model(finding, Confidence::Exact, model, serial.clone(), usb_id));
                }

                let vr_product = usb_id.filter(|id| catalog::is_vr_usb_product(id.vendor_id, id.product_id));
                if let Some(id) = vr_product {
                    if let Some(model) = recognized {
                        return Some(Self::from_model(finding, Confidence::Partial, model, serial.clone(), usb_id));
                    }
                    // Product strings differ between probes; only the USB id is stable
                    let vendor = catalog::vendor_for_usb(id.vendor_id);
                    let model = product
                        .as_deref()
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("USB {id}"));
                    return Some(Self {
                        confidence: Confidence::Partial,
                        rank: finding.rank,
                        probe: finding.probe,
                        key: DeviceKey::new(vendor, &format!("usb-{id}")),
                        kind: DeviceKind::Unknown,
                        vendor,
                        model,
                        tracking: TrackingTechnology::Unknown,
                        capabilities: BTreeSet::new(),
                        specs: None,
                        serial: serial.clone(),
                        usb_id,
                    });
                }

                recognized.map(|model| {
                    Self::from_model(finding, Confidence::Heuristic, model, serial.clone(), usb_id)
                })
            }
            Evidence::DeviceName { name } => catalog::recognize_model(name)
                .map(|model| Self::from_model(finding, Confidence::Heuristic, model, None, None)),
            Evidence::Process { .. }
            | Evidence::PlatformInstall { .. }
            | Evidence::PlatformTitles { .. } => None,
        }
    }
}

/// One finding interpreted as evidence for a platform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PlatformCandidate {
    confidence: Confidence,
    rank: usize,
    probe: ProbeId,
    platform: PlatformId,
    method: DetectionMethod,
    install_path: Option<PathBuf>,
    version: Option<String>,
}

impl PlatformCandidate {
    fn from_finding(finding: &RawFinding) -> Option<Self> {
        let (platform, method, install_path, version) = match &finding.evidence {
            Evidence::PlatformInstall {
                platform,
                install_path,
                version,
                method,
            } => (*platform, *method, install_path.clone(), version.clone()),
            // Only a process-listing probe may claim a platform is running
            Evidence::Process { name } if finding.probe.is_process_listing() => {
                (catalog::platform_for_process(name)?, DetectionMethod::Process, None, None)
            }
            _ => return None,
        };

        Some(Self {
            confidence: method.confidence(),
            rank: finding.rank,
            probe: finding.probe,
            platform,
            method,
            install_path,
            version,
        })
    }

    fn is_process(&self) -> bool {
        self.method == DetectionMethod::Process
    }
}

/// Best first: higher confidence, then lower rank, then content
fn by_priority<T: Ord>(a: &T, b: &T, priority: impl Fn(&T) -> (Confidence, usize)) -> Ordering {
    let (ca, ra) = priority(a);
    let (cb, rb) = priority(b);
    cb.cmp(&ca).then(ra.cmp(&rb)).then_with(|| a.cmp(b))
}

/// Canonical device records from the hardware chain's findings
pub fn merge_devices(
    findings: &[RawFinding],
    diagnostics: &RecordDiagnostics,
) -> BTreeMap<DeviceKey, DeviceRecord> {
    let mut groups: BTreeMap<DeviceKey, Vec<DeviceCandidate>> = BTreeMap::new();
    for candidate in findings.iter().filter_map(DeviceCandidate::from_finding) {
        groups.entry(candidate.key.clone()).or_default().push(candidate);
    }

    groups
        .into_iter()
        .filter_map(|(key, mut group)| {
            group.sort_by(|a, b| by_priority(a, b, |c: &DeviceCandidate| (c.confidence, c.rank)));
            let best = group.first()?;

            let record = DeviceRecord {
                key: key.clone(),
                kind: best.kind,
                vendor: best.vendor,
                model: best.model.clone(),
                tracking: best.tracking,
                capabilities: best.capabilities.clone(),
                source_probes: group.iter().map(|c| c.probe).collect(),
                confidence: best.confidence,
                serial: group.iter().find_map(|c| c.serial.clone()),
                usb_id: group.iter().find_map(|c| c.usb_id),
                specs: group.iter().find_map(|c| c.specs),
                diagnostics: diagnostics.clone(),
            };
            Some((key, record))
        })
        .collect()
}

/// Canonical platform records from the platform chain's findings
pub fn merge_platforms(
    findings: &[RawFinding],
    diagnostics: &RecordDiagnostics,
) -> BTreeMap<PlatformId, PlatformRecord> {
    let mut groups: BTreeMap<PlatformId, Vec<PlatformCandidate>> = BTreeMap::new();
    for candidate in findings.iter().filter_map(PlatformCandidate::from_finding) {
        groups.entry(candidate.platform).or_default().push(candidate);
    }

    // Titles only decorate a platform that was located some other way
    let mut titles: BTreeMap<PlatformId, BTreeSet<String>> = BTreeMap::new();
    for finding in findings {
        if let Evidence::PlatformTitles { platform, titles: found } = &finding.evidence {
            titles.entry(*platform).or_default().extend(found.iter().cloned());
        }
    }

    groups
        .into_iter()
        .filter_map(|(platform_id, mut group)| {
            group.sort_by(|a, b| by_priority(a, b, |c: &PlatformCandidate| (c.confidence, c.rank)));
            let best = group.first()?;

            let record = PlatformRecord {
                platform_id,
                install_path: group.iter().find_map(|c| c.install_path.clone()),
                installed: group.iter().any(|c| !c.is_process()),
                running: group.iter().any(PlatformCandidate::is_process),
                version: group.iter().find_map(|c| c.version.clone()),
                detection_method: best.method,
                confidence: best.confidence,
                source_probes: group.iter().map(|c| c.probe).collect(),
                supported_titles: titles.get(&platform_id).cloned().unwrap_or_default(),
                diagnostics: diagnostics.clone(),
            };
            Some((platform_id, record))
        })
        .collect()
}
