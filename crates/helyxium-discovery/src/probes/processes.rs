//! Running-process enumeration
//!
//! Four independent techniques: `tasklist` and a CIM query on Windows, `ps` on
//! Unix, and in-process enumeration through `sysinfo` everywhere. All of them
//! report only processes that belong to a known VR platform.

use async_trait::async_trait;
use helyxium_core::{catalog, Evidence, ProbeError, ProbeId, ProbeReport};
use std::collections::BTreeSet;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

use super::Probe;
use crate::context::{run_command, ProbeContext};

/// Windows `tasklist` in CSV form
pub struct TasklistProbe;

#[async_trait]
impl Probe for TasklistProbe {
    fn id(&self) -> ProbeId {
        ProbeId::Tasklist
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command("tasklist", &["/FO", "CSV", "/NH"], ctx.timeout)
            .await
            .map(|out| process_evidence(parse_tasklist_csv(&out)));
        ProbeReport::from_result(result)
    }
}

/// Image names from `tasklist /FO CSV /NH`: `"vrmonitor.exe","8212","Console","1","52,104 K"`
pub fn parse_tasklist_csv(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let (name, _) = rest.split_once('"')?;
            Some(name.to_string())
        })
        .collect()
}

const CIM_QUERY: &str = "Get-CimInstance Win32_Process | Select-Object -ExpandProperty Name";

/// Windows management instrumentation process query
pub struct CimProcessesProbe;

#[async_trait]
impl Probe for CimProcessesProbe {
    fn id(&self) -> ProbeId {
        ProbeId::CimProcesses
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", CIM_QUERY],
            ctx.timeout,
        )
        .await
        .map(|out| process_evidence(out.lines().map(str::to_string)));
        ProbeReport::from_result(result)
    }
}

/// `ps -A -o comm=`; macOS prints full paths, Linux the 15-char comm
pub struct PsProbe;

#[async_trait]
impl Probe for PsProbe {
    fn id(&self) -> ProbeId {
        ProbeId::Ps
    }

    async fn run(&self, ctx: &ProbeContext) -> ProbeReport {
        let result = run_command("ps", &["-A", "-o", "comm="], ctx.timeout)
            .await
            .map(|out| process_evidence(out.lines().map(str::to_string)));
        ProbeReport::from_result(result)
    }
}

/// Process table read in-process through `sysinfo`
pub struct SysinfoProcessesProbe;

#[async_trait]
impl Probe for SysinfoProcessesProbe {
    fn id(&self) -> ProbeId {
        ProbeId::SysinfoProcesses
    }

    async fn run(&self, _ctx: &ProbeContext) -> ProbeReport {
        let names = tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing(),
            );
            system
                .processes()
                .values()
                .map(|p| p.name().to_string_lossy().to_string())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ProbeError::Unavailable(format!("process enumeration task failed: {e}")));

        ProbeReport::from_result(names.map(process_evidence))
    }
}

/// Evidence for the distinct process names that map to a known platform
pub fn process_evidence<I>(names: I) -> Vec<Evidence>
where
    I: IntoIterator<Item = String>,
{
    let matched: BTreeSet<String> = names
        .into_iter()
        .filter(|name| catalog::platform_for_process(name).is_some())
        .map(|name| catalog::normalize_process_name(&name))
        .collect();

    if !matched.is_empty() {
        debug!(processes = ?matched, "VR processes running");
    }

    matched
        .into_iter()
        .map(|name| Evidence::Process { name })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tasklist_csv() {
        let output = "\
\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r
\"vrmonitor.exe\",\"8212\",\"Console\",\"1\",\"52,104 K\"\r
\"vrserver.exe\",\"8300\",\"Console\",\"1\",\"98,440 K\"\r
INFO: No tasks are running which match the specified criteria.\r
";
        assert_eq!(
            parse_tasklist_csv(output),
            vec!["System Idle Process", "vrmonitor.exe", "vrserver.exe"]
        );
    }

    #[test]
    fn test_process_evidence_filters_and_dedups() {
        let names = [
            "explorer.exe",
            "vrmonitor.exe",
            "VRMonitor.exe",
            "/Applications/Steam.app/Contents/MacOS/steam_osx",
            "/usr/bin/monado-service",
        ]
        .map(str::to_string);

        assert_eq!(
            process_evidence(names),
            vec![
                Evidence::Process {
                    name: "monado-service".to_string()
                },
                Evidence::Process {
                    name: "vrmonitor".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_sysinfo_probe_succeeds() {
        let ctx = ProbeContext::bare(crate::context::Os::Linux, std::time::Duration::from_secs(5));
        let report = SysinfoProcessesProbe.run(&ctx).await;
        assert!(report.outcome.is_success());
    }
}
