//! Linux USB enumeration through sysfs and `lsusb`

use async_trait::async_trait;
use helyxium_core::{Evidence, ProbeError, ProbeId, ProbeReport};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace};

use super::{parse_hex_id, Probe};
use crate::context::{run_command, ProbeContext};

/// Walks `/sys/bus/usb/devices/*` reading the descriptor attribute files
pub struct SysfsUsbProbe;

#[async_trait]
impl Probe for SysfsUsbProbe {
    fn id(&self) -> ProbeId {
        ProbeId::SysfsUsb
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        ProbeReport::from_result(scan_sysfs(&ctx.sysfs_root).await)
    }
}

async fn scan_sysfs(root: &Path) -> Result<Vec<Evidence>, ProbeError> {
    let mut entries = tokio::fs::read_dir(root).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ProbeError::Unavailable(format!("{} does not exist", root.display())),
        ErrorKind::PermissionDenied => ProbeError::PermissionDenied(root.display().to_string()),
        _ => ProbeError::Unavailable(format!("{}: {e}", root.display())),
    })?;

    let mut findings = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let dir = entry.path();
        // Interfaces (`1-1:1.0`) carry no idVendor; skipping them is enough
        let Some(vendor_id) = read_attr(&dir, "idVendor").await.and_then(|v| parse_hex_id(&v)) else {
            continue;
        };
        let Some(product_id) = read_attr(&dir, "idProduct").await.and_then(|v| parse_hex_id(&v)) else {
            trace!(device = %dir.display(), "idVendor without idProduct");
            continue;
        };

        findings.push(Evidence::Usb {
            vendor_id,
            product_id,
            product: read_attr(&dir, "product").await,
            serial: read_attr(&dir, "serial").await,
        });
    }

    debug!(devices = findings.len(), "sysfs USB walk complete");
    Ok(findings)
}

async fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let value = tokio::fs::read_to_string(dir.join(name)).await.ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parses `lsusb` output
pub struct LsusbProbe;

#[async_trait]
impl Probe for LsusbProbe {
    fn id(&self) -> ProbeId {
        ProbeId::Lsusb
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command("lsusb", &[], ctx.timeout)
            .await
            .map(|out| parse_lsusb(&out));
        ProbeReport::from_result(result)
    }
}

/// Parse `lsusb` lines of the form
/// `Bus 001 Device 004: ID 2833:0204 Oculus VR, Inc. Quest 3`
pub fn parse_lsusb(output: &str) -> Vec<Evidence> {
    output.lines().filter_map(parse_lsusb_line).collect()
}

fn parse_lsusb_line(line: &str) -> Option<Evidence> {
    let (_, rest) = line.split_once(" ID ")?;
    let rest = rest.trim();
    let (ids, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let (vendor, product) = ids.split_once(':')?;

    let description = description.trim();
    Some(Evidence::Usb {
        vendor_id: parse_hex_id(vendor)?,
        product_id: parse_hex_id(product)?,
        product: (!description.is_empty()).then(|| description.to_string()),
        serial: None,
    })
}
