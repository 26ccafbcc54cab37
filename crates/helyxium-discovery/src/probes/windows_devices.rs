//! Windows Plug and Play device enumeration

use async_trait::async_trait;
use helyxium_core::{catalog, Evidence, ProbeError, ProbeId, ProbeReport};
use serde::Deserialize;
use tracing::debug;

use super::{parse_hex_id, Probe};
use crate::context::{run_command, ProbeContext};

const PNP_QUERY: &str = "Get-PnpDevice -PresentOnly | \
    Select-Object InstanceId,FriendlyName | ConvertTo-Json -Compress";

/// `Get-PnpDevice` through PowerShell, emitted as JSON
pub struct PnpDevicesProbe;

#[async_trait]
impl Probe for PnpDevicesProbe {
    fn id(&self) -> ProbeId {
        ProbeId::PnpDevices
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", PNP_QUERY],
            ctx.timeout,
        )
        .await
        .and_then(|out| parse_pnp_json(&out));
        ProbeReport::from_result(result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PnpEntry {
    instance_id: Option<String>,
    friendly_name: Option<String>,
}

/// `ConvertTo-Json` yields a bare object for a single result
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<PnpEntry>),
    One(PnpEntry),
}

/// Parse `Get-PnpDevice | ConvertTo-Json` output
pub fn parse_pnp_json(output: &str) -> Result<Vec<Evidence>, ProbeError> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }

    let entries = match serde_json::from_str::<OneOrMany>(output)
        .map_err(|e| ProbeError::MalformedData(format!("Get-PnpDevice JSON: {e}")))?
    {
        OneOrMany::Many(entries) => entries,
        OneOrMany::One(entry) => vec![entry],
    };

    let findings: Vec<Evidence> = entries
        .into_iter()
        .filter_map(|entry| device_evidence(entry.instance_id.as_deref(), entry.friendly_name))
        .collect();

    debug!(devices = findings.len(), "PnP device query parsed");
    Ok(findings)
}

/// Runs `pnputil /enum-devices /connected` and reads its text blocks
pub struct PnputilProbe;

#[async_trait]
impl Probe for PnputilProbe {
    fn id(&self) -> ProbeId {
        ProbeId::Pnputil
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command("pnputil", &["/enum-devices", "/connected"], ctx.timeout)
            .await
            .map(|out| parse_pnputil(&out));
        ProbeReport::from_result(result)
    }
}

/// Parse `pnputil /enum-devices` blocks separated by blank lines
pub fn parse_pnputil(output: &str) -> Vec<Evidence> {
    let mut findings = Vec::new();
    let mut instance_id: Option<String> = None;
    let mut description: Option<String> = None;

    for line in output.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if line.is_empty() {
            if let Some(evidence) = device_evidence(instance_id.as_deref(), description.take()) {
                findings.push(evidence);
            }
            instance_id = None;
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "Instance ID" => instance_id = Some(value.to_string()),
                "Device Description" => description = Some(value.to_string()),
                _ => {}
            }
        }
    }

    findings
}

/// USB evidence from an instance ID, or a recognised friendly name otherwise
fn device_evidence(instance_id: Option<&str>, name: Option<String>) -> Option<Evidence> {
    let name = name.filter(|n| !n.trim().is_empty());

    if let Some((vendor_id, product_id, serial)) = instance_id.and_then(parse_usb_instance_id) {
        return Some(Evidence::Usb {
            vendor_id,
            product_id,
            product: name,
            serial,
        });
    }

    let name = name?;
    catalog::recognize_model(&name).map(|_| Evidence::DeviceName { name })
}

/// Parse `USB\VID_2833&PID_0204\2G0YC5ZF8B0123` into ids and serial.
///
/// The third segment is only a serial when Windows did not synthesize it,
/// synthesized ones contain `&`.
pub fn parse_usb_instance_id(id: &str) -> Option<(u16, u16, Option<String>)> {
    let mut segments = id.split('\\');
    let bus = segments.next()?;
    if !bus.eq_ignore_ascii_case("usb") {
        return None;
    }

    let hardware = segments.next()?.to_ascii_uppercase();
    let vendor_id = field_after(&hardware, "VID_").and_then(parse_hex_id)?;
    let product_id = field_after(&hardware, "PID_").and_then(parse_hex_id)?;

    let serial = segments
        .next()
        .filter(|s| !s.is_empty() && !s.contains('&'))
        .map(str::to_string);

    Some((vendor_id, product_id, serial))
}

fn field_after<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    let start = s.find(marker)? + marker.len();
    s.get(start..start + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usb_instance_id() {
        assert_eq!(
            parse_usb_instance_id(r"USB\VID_2833&PID_0204\2G0YC5ZF8B0123"),
            Some((0x2833, 0x0204, Some("2G0YC5ZF8B0123".to_string())))
        );
        assert_eq!(
            parse_usb_instance_id(r"USB\VID_28DE&PID_2012&MI_00\7&2A3B&0&0000"),
            Some((0x28DE, 0x2012, None))
        );
        assert_eq!(parse_usb_instance_id(r"HID\VID_046D&PID_C52B\1"), None);
    }

    #[test]
    fn test_parse_pnp_json_array() {
        let json = r#"[
            {"InstanceId":"USB\\VID_2833&PID_0204\\2G0YC5ZF8B0123","FriendlyName":"Meta Quest 3"},
            {"InstanceId":"SWD\\MMDEVAPI\\{0.0.0.00000000}","FriendlyName":"Speakers"},
            {"InstanceId":"DISPLAY\\HVR0001\\5&1","FriendlyName":"HP Reverb G2"},
            {"InstanceId":"ACPI\\PNP0C0C\\2","FriendlyName":null}
        ]"#;
        let findings = parse_pnp_json(json).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(
            findings[0],
            Evidence::Usb {
                vendor_id: 0x2833,
                product_id: 0x0204,
                product: Some("Meta Quest 3".to_string()),
                serial: Some("2G0YC5ZF8B0123".to_string()),
            }
        );
        assert_eq!(
            findings[1],
            Evidence::DeviceName {
                name: "HP Reverb G2".to_string()
            }
        );
    }

    #[test]
    fn test_parse_pnp_json_single_object_and_empty() {
        let json = r#"{"InstanceId":"USB\\VID_28DE&PID_2000\\ABC123","FriendlyName":"Valve Index HMD"}"#;
        assert_eq!(parse_pnp_json(json).unwrap().len(), 1);
        assert!(parse_pnp_json("  \r\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_pnp_json_malformed() {
        assert!(matches!(
            parse_pnp_json("<html>"),
            Err(ProbeError::MalformedData(_))
        ));
    }

    #[test]
    fn test_parse_pnputil_blocks() {
        let output = "\
Microsoft PnP Utility

Instance ID:                USB\\VID_0BB4&PID_0309\\FA1234567
Device Description:         VIVE Pro 2
Class Name:                 USB
Status:                     Started

Instance ID:                PCI\\VEN_10DE&DEV_2484\\4&1
Device Description:         NVIDIA GeForce RTX 3070
Status:                     Started
";
        let findings = parse_pnputil(output);
        assert_eq!(
            findings,
            vec![Evidence::Usb {
                vendor_id: 0x0BB4,
                product_id: 0x0309,
                product: Some("VIVE Pro 2".to_string()),
                serial: Some("FA1234567".to_string()),
            }]
        );
    }
}
