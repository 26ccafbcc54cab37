//! Continuous detection monitor
//!
//! Re-runs detection on a fixed interval and on demand, feeds each result
//! through the snapshot cache, and publishes the outcome:
//! - `current_snapshot()` is a non-blocking read of the latest snapshot
//! - `subscribe()` receives a [`CycleUpdate`] for every completed cycle,
//!   including cycles where nothing changed
//! - `request_refresh()` triggers a cycle; concurrent requests coalesce

use helyxium_core::{Diff, Snapshot, SnapshotCache};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::orchestrator::DetectionOrchestrator;

/// Monitor timing configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between scheduled refresh cycles
    pub interval: Duration,
    /// Consecutive misses before an entity is reported removed
    pub hysteresis_cycles: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            hysteresis_cycles: 2,
        }
    }
}

/// Published after every completed cycle
#[derive(Debug, Clone)]
pub struct CycleUpdate {
    pub diff: Arc<Diff>,
    pub snapshot: Arc<Snapshot>,
}

/// Pending on-demand refresh.
///
/// Await [`RefreshHandle::wait`] for the result, or drop the handle to let
/// the refresh happen without waiting.
pub struct RefreshHandle {
    rx: oneshot::Receiver<CycleUpdate>,
}

impl RefreshHandle {
    /// Completes when the cycle serving this request has been published
    pub async fn wait(self) -> Result<CycleUpdate, DiscoveryError> {
        self.rx.await.map_err(|_| DiscoveryError::Cancelled)
    }
}

/// On-demand requests waiting for the next cycle
#[derive(Default)]
struct Waiters {
    /// Set once `run` has returned; new requests fail instead of queueing
    stopped: bool,
    pending: Vec<oneshot::Sender<CycleUpdate>>,
}

/// Cache plus cycle counter; held for the whole of a cycle
struct CycleState {
    cache: SnapshotCache,
    next_cycle: u64,
}

pub struct DetectionMonitor {
    orchestrator: DetectionOrchestrator,
    config: MonitorConfig,
    state: tokio::sync::Mutex<CycleState>,
    current: watch::Sender<Arc<Snapshot>>,
    updates: broadcast::Sender<CycleUpdate>,
    trigger: Notify,
    waiters: Mutex<Waiters>,
}

impl DetectionMonitor {
    pub fn new(orchestrator: DetectionOrchestrator, config: MonitorConfig) -> Result<Self, DiscoveryError> {
        if config.interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig("interval must be non-zero".to_string()));
        }
        let cache = SnapshotCache::new(config.hysteresis_cycles)
            .map_err(|e| DiscoveryError::InvalidConfig(e.to_string()))?;

        let (current, _) = watch::channel(Arc::new(Snapshot::empty()));
        let (updates, _) = broadcast::channel(100);

        Ok(Self {
            orchestrator,
            config,
            state: tokio::sync::Mutex::new(CycleState { cache, next_cycle: 1 }),
            current,
            updates,
            trigger: Notify::new(),
            waiters: Mutex::new(Waiters::default()),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Latest published snapshot; cycle 0 until the first cycle completes
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.current.borrow().clone()
    }

    /// Stream of every completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<CycleUpdate> {
        self.updates.subscribe()
    }

    /// Ask the running loop for a cycle as soon as possible.
    ///
    /// Requests made before the next cycle starts are all answered by it.
    /// Once the loop has stopped the handle resolves to
    /// [`DiscoveryError::Cancelled`] immediately.
    pub fn request_refresh(&self) -> RefreshHandle {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock_waiters();
        if waiters.stopped {
            debug!("Refresh requested after monitor stopped");
        } else {
            waiters.pending.push(tx);
            self.trigger.notify_one();
        }
        RefreshHandle { rx }
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one cycle on the caller's task, waiting for any cycle in progress
    pub async fn refresh_now(&self, cancel: &CancellationToken) -> Result<CycleUpdate, DiscoveryError> {
        self.cycle(cancel).await
    }

    /// Scheduled loop; returns once `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.lock_waiters().stopped = false;

        info!(
            os = %self.orchestrator.os(),
            interval_ms = self.config.interval.as_millis() as u64,
            hysteresis = self.config.hysteresis_cycles,
            "Detection monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => debug!("On-demand refresh"),
            }

            match self.cycle(&cancel).await {
                Ok(_) => {}
                Err(DiscoveryError::Cancelled) => break,
                Err(e) => warn!(error = %e, "Detection cycle failed"),
            }

            // Whatever triggered this cycle, the next scheduled one is a full
            // interval away, so a late tick cannot stack on an on-demand request
            ticker.reset();
        }

        let abandoned = {
            let mut waiters = self.lock_waiters();
            waiters.stopped = true;
            std::mem::take(&mut waiters.pending)
        };
        // Dropping the senders resolves each handle with Cancelled
        drop(abandoned);
        info!("Detection monitor stopped");
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleUpdate, DiscoveryError> {
        let mut state = self.state.lock().await;
        let waiters = std::mem::take(&mut self.lock_waiters().pending);

        let snapshot = match self.orchestrator.run_cycle(state.next_cycle, cancel).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Hand unanswered requests to the next cycle, if there is one
                let mut queue = self.lock_waiters();
                if !queue.stopped {
                    queue.pending.extend(waiters);
                }
                return Err(e);
            }
        };
        state.next_cycle += 1;

        let (snapshot, diff) = state.cache.apply(snapshot);
        let update = CycleUpdate {
            diff: Arc::new(diff),
            snapshot,
        };

        if update.diff.is_empty() {
            debug!(cycle = update.snapshot.cycle, "No changes");
        } else {
            info!(
                cycle = update.snapshot.cycle,
                devices_added = update.diff.devices.added.len(),
                devices_removed = update.diff.devices.removed.len(),
                platforms_added = update.diff.platforms.added.len(),
                platforms_removed = update.diff.platforms.removed.len(),
                changed = update.diff.devices.changed.len() + update.diff.platforms.changed.len(),
                "Detection state changed"
            );
        }

        self.current.send_replace(update.snapshot.clone());
        // No subscribers is fine
        let _ = self.updates.send(update.clone());
        for waiter in waiters {
            let _ = waiter.send(update.clone());
        }

        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Os, ProbeContext};
    use crate::orchestrator::tests::{orchestrator, quest_3_usb};
    use crate::probes::Probe;
    use crate::registry::{ProbeRegistry, ProbeToggles};
    use async_trait::async_trait;
    use helyxium_core::{
        Confidence, DeviceKey, ProbeError, ProbeId, ProbeReport, TrackingTechnology, Vendor,
    };

    /// Probe whose report the test can swap between cycles
    struct SwitchableProbe {
        id: ProbeId,
        report: Arc<Mutex<ProbeReport>>,
    }

    #[async_trait]
    impl Probe for SwitchableProbe {
        fn id(&self) -> ProbeId {
            self.id
        }

        async fn run(&self, _ctx: &ProbeContext) -> ProbeReport {
            self.report.lock().unwrap().clone()
        }
    }

    type Switch = Arc<Mutex<ProbeReport>>;

    fn monitor(interval: Duration) -> (Arc<DetectionMonitor>, Switch) {
        let (monitor, sysfs, _) = monitor_switching(interval);
        (monitor, sysfs)
    }

    /// Monitor where sysfs starts out seeing a Quest 3 and lsusb sees nothing
    fn monitor_switching(interval: Duration) -> (Arc<DetectionMonitor>, Switch, Switch) {
        let sysfs = Arc::new(Mutex::new(ProbeReport::success(vec![quest_3_usb()])));
        let lsusb = Arc::new(Mutex::new(ProbeReport::success(Vec::new())));
        let (shared_sysfs, shared_lsusb) = (sysfs.clone(), lsusb.clone());

        let chains = ProbeRegistry::resolve_with(Os::Linux, &ProbeToggles::new(), move |id| {
            let report = match id {
                ProbeId::SysfsUsb => shared_sysfs.clone(),
                ProbeId::Lsusb => shared_lsusb.clone(),
                _ => Arc::new(Mutex::new(ProbeReport::success(Vec::new()))),
            };
            Arc::new(SwitchableProbe { id, report }) as Arc<dyn Probe>
        })
        .unwrap();

        let orchestrator =
            DetectionOrchestrator::new(chains, ProbeContext::bare(Os::Linux, Duration::from_secs(1)));
        let config = MonitorConfig {
            interval,
            hysteresis_cycles: 2,
        };
        (Arc::new(DetectionMonitor::new(orchestrator, config).unwrap()), sysfs, lsusb)
    }

    #[tokio::test]
    async fn test_quest_3_four_cycle_scenario() {
        let (monitor, usb) = monitor(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let key = DeviceKey::new(Vendor::Meta, "Quest 3");

        let first = monitor.refresh_now(&cancel).await.unwrap();
        assert_eq!(first.diff.devices.added.len(), 1);
        let quest = &first.snapshot.devices[&key];
        assert_eq!(quest.vendor, Vendor::Meta);
        assert_eq!(quest.tracking, TrackingTechnology::InsideOut);
        assert_eq!(quest.confidence, Confidence::Exact);

        let second = monitor.refresh_now(&cancel).await.unwrap();
        assert!(second.diff.is_empty());

        *usb.lock().unwrap() = ProbeReport::success(Vec::new());

        let third = monitor.refresh_now(&cancel).await.unwrap();
        assert!(third.diff.is_empty());
        assert_eq!(third.snapshot.pending_removal.devices.get(&key), Some(&1));

        let fourth = monitor.refresh_now(&cancel).await.unwrap();
        assert_eq!(fourth.diff.devices.removed.len(), 1);
        assert_eq!(fourth.diff.devices.removed[0].key, key);
        assert!(monitor.current_snapshot().devices.is_empty());
        assert_eq!(monitor.current_snapshot().cycle, 4);
    }

    #[tokio::test]
    async fn test_flaky_corroborating_source_does_not_flap() {
        let (monitor, _, lsusb) = monitor_switching(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let key = DeviceKey::new(Vendor::Meta, "Quest 3");
        *lsusb.lock().unwrap() = ProbeReport::success(vec![quest_3_usb()]);

        let first = monitor.refresh_now(&cancel).await.unwrap();
        assert_eq!(first.diff.devices.added.len(), 1);
        assert_eq!(first.snapshot.devices[&key].source_probes.len(), 2);

        *lsusb.lock().unwrap() = ProbeReport::failed(ProbeError::Timeout(Duration::from_secs(1)));
        let second = monitor.refresh_now(&cancel).await.unwrap();
        assert!(second.diff.is_empty());
        assert!(second.diff.degraded);
        assert_eq!(second.snapshot.devices[&key].source_probes.len(), 1);

        *lsusb.lock().unwrap() = ProbeReport::success(vec![quest_3_usb()]);
        let third = monitor.refresh_now(&cancel).await.unwrap();
        assert!(third.diff.is_empty());
        assert!(!third.diff.degraded);
        assert_eq!(third.snapshot.devices[&key].source_probes.len(), 2);
    }

    #[tokio::test]
    async fn test_every_cycle_is_published() {
        let (monitor, _) = monitor(Duration::from_secs(3600));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        assert_eq!(monitor.current_snapshot().cycle, 0);
        monitor.refresh_now(&cancel).await.unwrap();
        monitor.refresh_now(&cancel).await.unwrap();

        let first = rx.recv().await.unwrap();
        let heartbeat = rx.recv().await.unwrap();
        assert!(!first.diff.is_empty());
        assert!(heartbeat.diff.is_empty());
        assert_eq!(heartbeat.snapshot.cycle, 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let (monitor, _) = monitor(Duration::from_secs(3600));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let runner = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        // Initial tick
        assert_eq!(rx.recv().await.unwrap().snapshot.cycle, 1);

        let handles = [
            monitor.request_refresh(),
            monitor.request_refresh(),
            monitor.request_refresh(),
        ];
        let mut cycles = Vec::new();
        for handle in handles {
            cycles.push(handle.wait().await.unwrap().snapshot.cycle);
        }
        assert_eq!(cycles, vec![2, 2, 2]);

        assert_eq!(rx.recv().await.unwrap().snapshot.cycle, 2);
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err());

        cancel.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_still_refreshes() {
        let (monitor, _) = monitor(Duration::from_secs(3600));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let runner = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };
        rx.recv().await.unwrap();

        drop(monitor.request_refresh());
        let update = rx.recv().await.unwrap();
        assert_eq!(update.snapshot.cycle, 2);

        cancel.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_after_stop_resolves_cancelled() {
        let (monitor, _) = monitor(Duration::from_secs(3600));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let runner = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };
        rx.recv().await.unwrap();
        cancel.cancel();
        runner.await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), monitor.request_refresh().wait()).await;
        assert!(matches!(result, Ok(Err(DiscoveryError::Cancelled))));
    }

    #[tokio::test]
    async fn test_queued_request_released_when_loop_stops() {
        let (monitor, _) = monitor(Duration::from_secs(3600));
        let handle = monitor.request_refresh();

        let cancel = CancellationToken::new();
        cancel.cancel();
        monitor.run(cancel).await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle.wait()).await;
        assert!(matches!(result, Ok(Err(DiscoveryError::Cancelled))));
        assert_eq!(monitor.current_snapshot().cycle, 0);
    }

    #[tokio::test]
    async fn test_request_during_overrunning_cycle_runs_once() {
        let slow = orchestrator(
            vec![(
                ProbeId::SysfsUsb,
                Duration::from_millis(500),
                ProbeReport::success(vec![quest_3_usb()]),
            )],
            Duration::from_secs(5),
        );
        let config = MonitorConfig {
            interval: Duration::from_millis(400),
            hysteresis_cycles: 2,
        };
        let monitor = Arc::new(DetectionMonitor::new(slow, config).unwrap());
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let runner = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        // Lands while the first cycle is still running
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(monitor.request_refresh());

        assert_eq!(rx.recv().await.unwrap().snapshot.cycle, 1);
        assert_eq!(rx.recv().await.unwrap().snapshot.cycle, 2);
        // Next cycle is a full interval plus a cycle's runtime away
        assert!(tokio::time::timeout(Duration::from_millis(600), rx.recv())
            .await
            .is_err());

        cancel.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_drives_cycles() {
        let (monitor, _) = monitor(Duration::from_millis(20));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let runner = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        for expected in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().snapshot.cycle, expected);
        }

        cancel.cancel();
        runner.await.unwrap();
    }

    #[test]
    fn test_zero_hysteresis_rejected() {
        let chains = ProbeRegistry::resolve(Os::Linux, &ProbeToggles::new()).unwrap();
        let orchestrator =
            DetectionOrchestrator::new(chains, ProbeContext::bare(Os::Linux, Duration::from_secs(1)));
        let config = MonitorConfig {
            interval: Duration::from_secs(1),
            hysteresis_cycles: 0,
        };
        assert!(matches!(
            DetectionMonitor::new(orchestrator, config),
            Err(DiscoveryError::InvalidConfig(_))
        ));
    }
}
