//! Detection orchestrator
//!
//! Runs every probe of both chains concurrently, waits for all of them, then
//! merges the evidence into one snapshot. Probe failures are data, not errors:
//! the only way a cycle fails is cancellation.

use helyxium_core::{
    CycleReport, ProbeError, ProbeId, ProbeOutcome, ProbeReport, RawFinding, RecordDiagnostics,
    Snapshot, Target, TargetReport,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::{Os, ProbeContext};
use crate::error::DiscoveryError;
use crate::merge::{merge_devices, merge_platforms};
use crate::registry::{ProbeRegistry, ProbeToggles, ResolvedChains};

/// Result of one probe task
struct ProbeRun {
    target: Target,
    probe: ProbeId,
    rank: usize,
    report: ProbeReport,
    elapsed: Duration,
}

/// Evidence and outcomes collected for one target
#[derive(Default)]
struct TargetEvidence {
    findings: Vec<RawFinding>,
    outcomes: BTreeMap<ProbeId, ProbeOutcome>,
}

impl TargetEvidence {
    fn diagnostics(&self) -> RecordDiagnostics {
        RecordDiagnostics {
            missing_sources: self
                .outcomes
                .iter()
                .filter(|(_, outcome)| outcome.is_failure())
                .map(|(id, outcome)| (*id, outcome.clone()))
                .collect(),
        }
    }
}

pub struct DetectionOrchestrator {
    chains: ResolvedChains,
    ctx: Arc<ProbeContext>,
}

impl DetectionOrchestrator {
    pub fn new(chains: ResolvedChains, ctx: ProbeContext) -> Self {
        Self {
            chains,
            ctx: Arc::new(ctx),
        }
    }

    /// Orchestrator for the running host with real probes
    pub fn for_host(toggles: &ProbeToggles, timeout: Duration) -> Result<Self, DiscoveryError> {
        let chains = ProbeRegistry::resolve_host(toggles)?;
        let ctx = ProbeContext::from_env(chains.os, timeout);
        Ok(Self::new(chains, ctx))
    }

    pub fn os(&self) -> Os {
        self.chains.os
    }

    pub fn chains(&self) -> &ResolvedChains {
        &self.chains
    }

    /// Run both probe chains and build the snapshot for `cycle`.
    ///
    /// Cancelling drops the in-flight probe tasks (and their subprocesses)
    /// and discards everything collected so far.
    pub async fn run_cycle(&self, cycle: u64, cancel: &CancellationToken) -> Result<Snapshot, DiscoveryError> {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut evidence: BTreeMap<Target, TargetEvidence> = BTreeMap::new();

        for target in [Target::Hardware, Target::Platforms] {
            let slot = evidence.entry(target).or_default();
            for entry in &self.chains.chain(target).entries {
                let probe = entry.probe.clone();
                let ctx = self.ctx.clone();
                let rank = entry.rank;
                let id = probe.id();

                // Replaced when the task reports back; survives only if it panics
                slot.outcomes
                    .insert(id, ProbeOutcome::Unavailable("probe task panicked".to_string()));

                tasks.spawn(async move {
                    let probe_started = Instant::now();
                    let report = match tokio::time::timeout(ctx.timeout, probe.run(&ctx)).await {
                        Ok(report) => report,
                        Err(_) => ProbeReport::failed(ProbeError::Timeout(ctx.timeout)),
                    };
                    ProbeRun {
                        target,
                        probe: id,
                        rank,
                        report,
                        elapsed: probe_started.elapsed(),
                    }
                });
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(cycle, pending = tasks.len(), "Cycle cancelled, aborting probes");
                    tasks.abort_all();
                    return Err(DiscoveryError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    Some(Ok(run)) => {
                        debug!(
                            probe = %run.probe,
                            findings = run.report.findings.len(),
                            outcome = ?run.report.outcome,
                            elapsed_ms = run.elapsed.as_millis() as u64,
                            "Probe finished"
                        );
                        let slot = evidence.entry(run.target).or_default();
                        slot.outcomes.insert(run.probe, run.report.outcome);
                        slot.findings.extend(
                            run.report
                                .findings
                                .into_iter()
                                .map(|e| RawFinding::new(run.probe, run.rank, e)),
                        );
                    }
                    Some(Err(e)) => warn!(cycle, error = %e, "Probe task failed"),
                    None => break,
                }
            }
        }

        let hardware = evidence.remove(&Target::Hardware).unwrap_or_default();
        let platforms = evidence.remove(&Target::Platforms).unwrap_or_default();

        let devices = merge_devices(&hardware.findings, &hardware.diagnostics());
        let platform_records = merge_platforms(&platforms.findings, &platforms.diagnostics());

        let report = CycleReport {
            hardware: TargetReport::new(Target::Hardware, hardware.outcomes, devices.len()),
            platforms: TargetReport::new(Target::Platforms, platforms.outcomes, platform_records.len()),
        };

        for target in report.no_evidence_targets() {
            warn!(cycle, %target, "Every probe failed, holding previous state");
        }

        debug!(
            cycle,
            devices = devices.len(),
            platforms = platform_records.len(),
            degraded = report.is_degraded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Detection cycle complete"
        );

        Ok(Snapshot::new(cycle, devices, platform_records, report))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::probes::Probe;
    use async_trait::async_trait;
    use helyxium_core::{Evidence, TargetStatus};
    use std::collections::HashMap;

    /// Probe with a scripted result and latency
    pub(crate) struct FakeProbe {
        pub id: ProbeId,
        pub delay: Duration,
        pub report: ProbeReport,
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn id(&self) -> ProbeId {
            self.id
        }

        async fn run(&self, _ctx: &ProbeContext) -> ProbeReport {
            tokio::time::sleep(self.delay).await;
            self.report.clone()
        }
    }

    /// Linux chains where unscripted probes succeed instantly with nothing
    pub(crate) fn orchestrator(
        scripted: Vec<(ProbeId, Duration, ProbeReport)>,
        timeout: Duration,
    ) -> DetectionOrchestrator {
        let scripts: HashMap<ProbeId, (Duration, ProbeReport)> = scripted
            .into_iter()
            .map(|(id, delay, report)| (id, (delay, report)))
            .collect();

        let chains = ProbeRegistry::resolve_with(Os::Linux, &ProbeToggles::new(), |id| {
            let (delay, report) = scripts
                .get(&id)
                .cloned()
                .unwrap_or((Duration::ZERO, ProbeReport::success(Vec::new())));
            Arc::new(FakeProbe { id, delay, report }) as Arc<dyn Probe>
        })
        .unwrap();

        DetectionOrchestrator::new(chains, ProbeContext::bare(Os::Linux, timeout))
    }

    pub(crate) fn quest_3_usb() -> Evidence {
        Evidence::Usb {
            vendor_id: 0x2833,
            product_id: 0x0204,
            product: Some("Quest 3".to_string()),
            serial: None,
        }
    }

    #[tokio::test]
    async fn test_cycle_merges_across_probes() {
        let orch = orchestrator(
            vec![
                (ProbeId::SysfsUsb, Duration::ZERO, ProbeReport::success(vec![quest_3_usb()])),
                (ProbeId::Lsusb, Duration::from_millis(20), ProbeReport::success(vec![quest_3_usb()])),
                (
                    ProbeId::Ps,
                    Duration::ZERO,
                    ProbeReport::success(vec![Evidence::Process {
                        name: "monado-service".to_string(),
                    }]),
                ),
            ],
            Duration::from_secs(1),
        );

        let snapshot = orch.run_cycle(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices.values().next().unwrap().source_probes.len(), 2);
        assert!(snapshot.platforms[&helyxium_core::PlatformId::Monado].running);
        assert_eq!(snapshot.report.hardware.status, TargetStatus::Detected);
        assert!(!snapshot.report.is_degraded());
    }

    #[tokio::test]
    async fn test_timing_out_probe_is_isolated() {
        let orch = orchestrator(
            vec![
                (ProbeId::SysfsUsb, Duration::ZERO, ProbeReport::success(vec![quest_3_usb()])),
                (ProbeId::Lsusb, Duration::from_secs(30), ProbeReport::success(Vec::new())),
            ],
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let snapshot = orch.run_cycle(1, &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(snapshot.report.hardware.outcomes[&ProbeId::Lsusb], ProbeOutcome::Timeout);
        let quest = snapshot.devices.values().next().unwrap();
        assert_eq!(
            quest.diagnostics.missing_sources.get(&ProbeId::Lsusb),
            Some(&ProbeOutcome::Timeout)
        );
        assert!(snapshot.report.is_degraded());
        assert_eq!(snapshot.report.hardware.status, TargetStatus::Detected);
    }

    #[tokio::test]
    async fn test_all_failed_is_no_evidence() {
        let denied = ProbeReport::failed(ProbeError::PermissionDenied("/sys".to_string()));
        let orch = orchestrator(
            vec![
                (ProbeId::SysfsUsb, Duration::ZERO, denied.clone()),
                (
                    ProbeId::Lsusb,
                    Duration::ZERO,
                    ProbeReport::failed(ProbeError::Unavailable("lsusb not found".to_string())),
                ),
            ],
            Duration::from_secs(1),
        );

        let snapshot = orch.run_cycle(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.report.hardware.status, TargetStatus::NoEvidence);
        assert_eq!(snapshot.report.platforms.status, TargetStatus::NothingDetected);
        assert_eq!(snapshot.report.no_evidence_targets(), vec![Target::Hardware]);
    }

    #[tokio::test]
    async fn test_cancellation_discards_cycle() {
        let orch = orchestrator(
            vec![(ProbeId::SysfsUsb, Duration::from_secs(30), ProbeReport::success(Vec::new()))],
            Duration::from_secs(60),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = orch.run_cycle(1, &cancel).await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }
}
