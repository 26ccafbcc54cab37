//! Static knowledge about VR hardware and software
//!
//! - USB vendor/product IDs of headsets and controllers
//! - Model-name recognition for friendly names reported by the OS
//! - Process image names of VR runtimes and applications

use crate::device::{Capability, DeviceKind, DisplaySpecs, TrackingTechnology, Vendor};
use crate::platform::PlatformId;

/// A known hardware model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareModel {
    pub vendor: Vendor,
    pub model: &'static str,
    pub kind: DeviceKind,
    pub tracking: TrackingTechnology,
    pub capabilities: &'static [Capability],
    pub specs: Option<DisplaySpecs>,
}

const fn specs(max_refresh_hz: u16, w: u32, h: u32, fov: u16) -> Option<DisplaySpecs> {
    Some(DisplaySpecs {
        max_refresh_hz,
        resolution_per_eye: [w, h],
        fov_horizontal_deg: fov,
    })
}

use Capability::{EyeTracking, HandTracking, Passthrough, Wireless};

pub const QUEST_1: HardwareModel = HardwareModel {
    vendor: Vendor::Meta,
    model: "Quest",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[Wireless],
    specs: specs(72, 1440, 1600, 100),
};

pub const QUEST_2: HardwareModel = HardwareModel {
    vendor: Vendor::Meta,
    model: "Quest 2",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, Passthrough, Wireless],
    specs: specs(120, 1832, 1920, 100),
};

pub const QUEST_3: HardwareModel = HardwareModel {
    vendor: Vendor::Meta,
    model: "Quest 3",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, Passthrough, Wireless],
    specs: specs(120, 2064, 2208, 110),
};

pub const QUEST_3S: HardwareModel = HardwareModel {
    vendor: Vendor::Meta,
    model: "Quest 3S",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, Passthrough, Wireless],
    specs: specs(120, 1832, 1920, 110),
};

pub const QUEST_PRO: HardwareModel = HardwareModel {
    vendor: Vendor::Meta,
    model: "Quest Pro",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, EyeTracking, Passthrough, Wireless],
    specs: specs(90, 1800, 1920, 106),
};

pub const VIVE: HardwareModel = HardwareModel {
    vendor: Vendor::Htc,
    model: "Vive",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[],
    specs: specs(90, 1080, 1200, 110),
};

pub const VIVE_PRO: HardwareModel = HardwareModel {
    vendor: Vendor::Htc,
    model: "Vive Pro",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[],
    specs: specs(90, 1440, 1600, 110),
};

pub const VIVE_PRO_2: HardwareModel = HardwareModel {
    vendor: Vendor::Htc,
    model: "Vive Pro 2",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[],
    specs: specs(120, 2448, 2448, 120),
};

pub const VIVE_COSMOS: HardwareModel = HardwareModel {
    vendor: Vendor::Htc,
    model: "Vive Cosmos",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[],
    specs: specs(90, 1440, 1700, 110),
};

pub const VALVE_INDEX: HardwareModel = HardwareModel {
    vendor: Vendor::Valve,
    model: "Index",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[],
    specs: specs(144, 1440, 1600, 130),
};

pub const INDEX_CONTROLLER: HardwareModel = HardwareModel {
    vendor: Vendor::Valve,
    model: "Index Controller",
    kind: DeviceKind::Controller,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[HandTracking, Wireless],
    specs: None,
};

/// Wireless receiver that pairs Lighthouse controllers and trackers
pub const WATCHMAN_DONGLE: HardwareModel = HardwareModel {
    vendor: Vendor::Valve,
    model: "Watchman Dongle",
    kind: DeviceKind::Controller,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[Wireless],
    specs: None,
};

pub const LIGHTHOUSE_BASE_STATION: HardwareModel = HardwareModel {
    vendor: Vendor::Valve,
    model: "Base Station",
    kind: DeviceKind::TrackingBaseStation,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[],
    specs: None,
};

pub const PSVR: HardwareModel = HardwareModel {
    vendor: Vendor::Sony,
    model: "PlayStation VR",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::OutsideIn,
    capabilities: &[],
    specs: specs(120, 960, 1080, 100),
};

pub const PSVR2: HardwareModel = HardwareModel {
    vendor: Vendor::Sony,
    model: "PlayStation VR2",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[EyeTracking],
    specs: specs(120, 2000, 2040, 110),
};

pub const PICO_4: HardwareModel = HardwareModel {
    vendor: Vendor::Pico,
    model: "Pico 4",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, Passthrough, Wireless],
    specs: specs(90, 2160, 2160, 105),
};

pub const VISION_PRO: HardwareModel = HardwareModel {
    vendor: Vendor::Apple,
    model: "Vision Pro",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking, EyeTracking, Passthrough],
    specs: specs(90, 3660, 3200, 100),
};

pub const VARJO_AERO: HardwareModel = HardwareModel {
    vendor: Vendor::Varjo,
    model: "Aero",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::Lighthouse,
    capabilities: &[EyeTracking],
    specs: specs(90, 2880, 2720, 115),
};

pub const WMR_HEADSET: HardwareModel = HardwareModel {
    vendor: Vendor::Microsoft,
    model: "Mixed Reality Headset",
    kind: DeviceKind::Headset,
    tracking: TrackingTechnology::InsideOut,
    capabilities: &[HandTracking],
    specs: specs(90, 1440, 1440, 100),
};

/// USB identifiers with a one-to-one model mapping
const USB_MODELS: &[(u16, u16, HardwareModel)] = &[
    (0x2833, 0x0186, QUEST_1),
    (0x2833, 0x0183, QUEST_2),
    (0x2833, 0x0204, QUEST_3),
    (0x2833, 0x0182, QUEST_PRO),
    (0x2833, 0x0206, QUEST_3S),
    (0x0BB4, 0x2C87, VIVE),
    (0x0BB4, 0x0306, VIVE_PRO),
    (0x0BB4, 0x0309, VIVE_PRO_2),
    (0x0BB4, 0x0313, VIVE_COSMOS),
    (0x28DE, 0x2000, VALVE_INDEX),
    (0x28DE, 0x2012, INDEX_CONTROLLER),
    (0x28DE, 0x2101, WATCHMAN_DONGLE),
    (0x054C, 0x09AF, PSVR),
    (0x054C, 0x0CDE, PSVR2),
    (0x2D40, 0x0001, PICO_4),
];

/// Vendor IDs that only ship VR hardware
const VR_ONLY_VENDORS: &[u16] = &[0x2833, 0x2D40];

/// Valve also ships Steam Controllers and the Steam Deck; its VR hardware
/// (HMDs, controllers, Watchman radios, base stations) sits in this range
const VALVE_VR_PRODUCTS: std::ops::RangeInclusive<u16> = 0x2000..=0x2FFF;

/// Look up an exact USB vendor/product match
pub fn lookup_usb(vendor_id: u16, product_id: u16) -> Option<&'static HardwareModel> {
    USB_MODELS
        .iter()
        .find(|(v, p, _)| *v == vendor_id && *p == product_id)
        .map(|(_, _, model)| model)
}

/// Map a USB vendor ID to a hardware vendor
pub fn vendor_for_usb(vendor_id: u16) -> Vendor {
    match vendor_id {
        0x2833 => Vendor::Meta,
        0x0BB4 => Vendor::Htc,
        0x28DE => Vendor::Valve,
        0x054C => Vendor::Sony,
        0x045E => Vendor::Microsoft,
        0x05AC => Vendor::Apple,
        0x2D40 => Vendor::Pico,
        _ => Vendor::Unknown,
    }
}

/// Whether a USB product is VR hardware even when its exact model is unknown
pub fn is_vr_usb_product(vendor_id: u16, product_id: u16) -> bool {
    match vendor_id {
        0x28DE => VALVE_VR_PRODUCTS.contains(&product_id),
        _ => VR_ONLY_VENDORS.contains(&vendor_id),
    }
}

/// Recognise a hardware model from a free-form product or friendly name
pub fn recognize_model(name: &str) -> Option<&'static HardwareModel> {
    let n = name.to_lowercase();

    if n.contains("quest") {
        return Some(if n.contains("pro") {
            &QUEST_PRO
        } else if n.contains("3s") {
            &QUEST_3S
        } else if n.contains('3') {
            &QUEST_3
        } else if n.contains('2') {
            &QUEST_2
        } else {
            &QUEST_1
        });
    }

    if n.contains("vive") {
        return Some(if n.contains("cosmos") {
            &VIVE_COSMOS
        } else if n.contains("pro 2") || n.contains("pro2") {
            &VIVE_PRO_2
        } else if n.contains("pro") {
            &VIVE_PRO
        } else {
            &VIVE
        });
    }

    if n.contains("index") && (n.contains("controller") || n.contains("knuckles")) {
        return Some(&INDEX_CONTROLLER);
    }
    if n.contains("index") && (n.contains("valve") || n.contains("hmd")) {
        return Some(&VALVE_INDEX);
    }

    if n.contains("watchman") {
        return Some(&WATCHMAN_DONGLE);
    }

    if n.contains("base station") || n.starts_with("lhb-") {
        return Some(&LIGHTHOUSE_BASE_STATION);
    }

    if n.contains("psvr") || n.contains("playstation vr") {
        return Some(if n.contains('2') { &PSVR2 } else { &PSVR });
    }

    if n.contains("pico") {
        return Some(&PICO_4);
    }

    if n.contains("vision pro") || (n.contains("apple") && n.contains("vision")) {
        return Some(&VISION_PRO);
    }

    if n.contains("varjo") {
        return Some(&VARJO_AERO);
    }

    if n.contains("mixed reality") || n.contains("hololens") || n.contains("reverb") {
        return Some(&WMR_HEADSET);
    }

    None
}

/// Process image names (lowercase, no extension) per platform
const PLATFORM_PROCESSES: &[(PlatformId, &[&str])] = &[
    (
        PlatformId::SteamVr,
        &["vrmonitor", "vrserver", "vrcompositor", "vrdashboard", "vrstartup"],
    ),
    (
        PlatformId::OculusPc,
        &["oculusclient", "ovrserver_x64", "ovrservice", "oculusdash", "ovrredir"],
    ),
    (PlatformId::WindowsMixedReality, &["mixedrealityportal"]),
    (PlatformId::VrChat, &["vrchat"]),
    (PlatformId::RecRoom, &["recroom", "recroom_release"]),
    (PlatformId::Viveport, &["viveport", "viveportdesktopservice"]),
    (
        PlatformId::VarjoBase,
        &["varjobase", "varjo-base", "varjohome", "varjocompositor"],
    ),
    (PlatformId::PicoConnect, &["picoconnect", "pico_connect"]),
    (PlatformId::PlaystationVr, &["psvr", "psvr_driver"]),
    (PlatformId::Monado, &["monado-service"]),
    (PlatformId::Alvr, &["alvr_dashboard", "alvr_launcher"]),
    (PlatformId::Wivrn, &["wivrn-server"]),
];

/// Normalize a process name: file name only, lowercase, no `.exe`
pub fn normalize_process_name(name: &str) -> String {
    let base = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match base.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => base,
    }
}

/// Map a running process to the platform it belongs to
pub fn platform_for_process(name: &str) -> Option<PlatformId> {
    let normalized = normalize_process_name(name);
    PLATFORM_PROCESSES
        .iter()
        .find(|(_, names)| names.contains(&normalized.as_str()))
        .map(|(platform, _)| *platform)
}

/// Process names that indicate a platform is active
pub fn processes_for_platform(platform: PlatformId) -> &'static [&'static str] {
    PLATFORM_PROCESSES
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

/// Steam app directory names of well-known VR titles (case-insensitive substrings)
const VR_TITLES: &[&str] = &[
    "half-life alyx",
    "beat saber",
    "vrchat",
    "pavlov vr",
    "superhot vr",
    "the lab",
    "rec room",
    "blade and sorcery",
    "skyrim vr",
    "fallout 4 vr",
    "elite dangerous",
    "no man's sky",
    "boneworks",
    "bonelab",
    "pistol whip",
    "job simulator",
    "vacation simulator",
    "arizona sunshine",
    "gorn",
    "space pirate trainer",
    "tilt brush",
    "google earth vr",
];

/// Whether a Steam app directory holds a known VR title
pub fn is_known_vr_title(app_dir: &str) -> bool {
    let name = app_dir.to_lowercase();
    VR_TITLES.iter().any(|title| name.contains(title))
}
