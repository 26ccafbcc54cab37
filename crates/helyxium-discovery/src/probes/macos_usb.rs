//! macOS USB enumeration via `system_profiler`

use async_trait::async_trait;
use helyxium_core::{catalog, Evidence, ProbeError, ProbeId, ProbeReport};
use serde_json::Value;

use super::{parse_hex_id, Probe};
use crate::context::{run_command, ProbeContext};

pub struct SystemProfilerUsbProbe;

#[async_trait]
impl Probe for SystemProfilerUsbProbe {
    fn id(&self) -> ProbeId {
        ProbeId::SystemProfilerUsb
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command("system_profiler", &["SPUSBDataType", "-json"], ctx.timeout)
            .await
            .and_then(|out| parse_system_profiler(&out));
        ProbeReport::from_result(result)
    }
}

/// Parse `system_profiler SPUSBDataType -json`, walking nested `_items`
pub fn parse_system_profiler(output: &str) -> Result<Vec<Evidence>, ProbeError> {
    let root: Value = serde_json::from_str(output)
        .map_err(|e| ProbeError::MalformedData(format!("system_profiler JSON: {e}")))?;

    let buses = root
        .get("SPUSBDataType")
        .or_else(|| root.get("SPUSBHostDataType"))
        .and_then(Value::as_array)
        .ok_or_else(|| ProbeError::MalformedData("missing SPUSBDataType array".to_string()))?;

    let mut findings = Vec::new();
    for bus in buses {
        walk_items(bus, &mut findings);
    }
    Ok(findings)
}

fn walk_items(node: &Value, findings: &mut Vec<Evidence>) {
    let text = |key: &str| node.get(key).and_then(Value::as_str).map(str::to_string);
    let name = text("_name");

    // "0x2833  (Oculus VR, Inc.)"
    let id = |key: &str| {
        node.get(key)
            .and_then(Value::as_str)
            .and_then(|s| s.split_whitespace().next())
            .and_then(parse_hex_id)
    };

    match (id("vendor_id"), id("product_id")) {
        (Some(vendor_id), Some(product_id)) => findings.push(Evidence::Usb {
            vendor_id,
            product_id,
            product: name,
            serial: text("serial_num"),
        }),
        _ => {
            if let Some(name) = name.filter(|n| catalog::recognize_model(n).is_some()) {
                findings.push(Evidence::DeviceName { name });
            }
        }
    }

    if let Some(children) = node.get("_items").and_then(Value::as_array) {
        for child in children {
            walk_items(child, findings);
        }
    }
}
