//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use helyxium_core::catalog;
use helyxium_core::{
    CapabilitiesSummary, CycleReport, DeviceKey, DeviceRecord, PendingRemoval, PlatformId,
    PlatformRecord, RecordDiagnostics,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Probe health for the latest cycle
#[derive(Serialize)]
pub struct DiagnosticsView {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub degraded: bool,
    pub report: CycleReport,
    pub pending_removal: PendingRemoval,
    /// Devices merged without every hardware probe contributing
    pub incomplete_devices: BTreeMap<DeviceKey, RecordDiagnostics>,
}

/// Headline readiness of the latest snapshot
#[derive(Serialize)]
pub struct StatusView {
    pub cycle: u64,
    pub vr_ready: bool,
    pub primary_device: Option<DeviceRecord>,
    pub capabilities: CapabilitiesSummary,
    pub running_platforms: Vec<PlatformId>,
    /// Installed but not running
    pub idle_platforms: Vec<PlatformId>,
}

#[derive(Serialize)]
pub struct PlatformView {
    #[serde(flatten)]
    pub record: PlatformRecord,
    /// Process names that mark this platform as running
    pub watched_processes: &'static [&'static str],
}

#[derive(Debug, Default, Deserialize)]
pub struct PlatformQuery {
    /// Only platforms with a running process
    #[serde(default)]
    pub running: bool,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    Json(StatusView {
        cycle: snapshot.cycle,
        vr_ready: snapshot.is_vr_ready(),
        primary_device: snapshot.primary_device().cloned(),
        capabilities: snapshot.capabilities_summary(),
        running_platforms: snapshot.running_platforms().map(|p| p.platform_id).collect(),
        idle_platforms: snapshot
            .platforms
            .values()
            .filter(|p| p.is_idle_install())
            .map(|p| p.platform_id)
            .collect(),
    })
}

/// Latest snapshot in full
pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    Json(snapshot.as_ref().clone())
}

/// List detected devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    let devices: Vec<DeviceRecord> = snapshot.devices.values().cloned().collect();
    Json(devices)
}

/// Get a device by its `vendor/model` key
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path((vendor, model)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = DeviceKey(format!("{}/{}", vendor, model));
    let snapshot = state.monitor.current_snapshot();
    match snapshot.device(&key) {
        Some(device) => Json(device.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("Device {} not found", key))),
        )
            .into_response(),
    }
}

/// List installed or running platforms
pub async fn list_platforms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlatformQuery>,
) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    let platforms: Vec<PlatformRecord> = if query.running {
        snapshot.running_platforms().cloned().collect()
    } else {
        snapshot.platforms.values().cloned().collect()
    };
    Json(platforms)
}

/// Get one platform by its snake_case id
pub async fn get_platform(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<PlatformId>,
) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    match snapshot.platform(platform) {
        Some(record) => Json(PlatformView {
            record: record.clone(),
            watched_processes: catalog::processes_for_platform(platform),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("{} not detected", platform))),
        )
            .into_response(),
    }
}

pub async fn get_diagnostics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.current_snapshot();
    let incomplete_devices = snapshot
        .devices
        .iter()
        .filter(|(_, device)| !device.diagnostics.is_complete())
        .map(|(key, device)| (key.clone(), device.diagnostics.clone()))
        .collect();

    Json(DiagnosticsView {
        cycle: snapshot.cycle,
        timestamp: snapshot.timestamp,
        degraded: snapshot.report.is_degraded(),
        report: snapshot.report.clone(),
        pending_removal: snapshot.pending_removal.clone(),
        incomplete_devices,
    })
}

/// Trigger a refresh and wait for its diff.
///
/// Requests arriving while a cycle is queued share that cycle.
pub async fn trigger_refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual refresh requested");
    match state.monitor.request_refresh().wait().await {
        Ok(update) => {
            debug!(cycle = update.diff.cycle, changes = update.diff.len(), "Refresh served");
            Json(update.diff.as_ref().clone()).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Refresh did not complete");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiError::new(format!("Refresh failed: {}", e))),
            )
                .into_response()
        }
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use helyxium_core::{Diff, Evidence, ProbeId, ProbeReport, Snapshot};
    use helyxium_discovery::{
        DetectionMonitor, DetectionOrchestrator, MonitorConfig, Os, Probe, ProbeContext,
        ProbeRegistry, ProbeToggles,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct StaticProbe {
        id: ProbeId,
        findings: Vec<Evidence>,
    }

    #[async_trait]
    impl Probe for StaticProbe {
        fn id(&self) -> ProbeId {
            self.id
        }

        async fn run(&self, _ctx: &ProbeContext) -> ProbeReport {
            ProbeReport::success(self.findings.clone())
        }
    }

    /// State backed by Linux chains where sysfs reports a Valve Index
    pub(crate) fn test_state() -> Arc<AppState> {
        let chains = ProbeRegistry::resolve_with(Os::Linux, &ProbeToggles::new(), |id| {
            let findings = match id {
                ProbeId::SysfsUsb => vec![Evidence::Usb {
                    vendor_id: 0x28DE,
                    product_id: 0x2000,
                    product: Some("Index HMD".to_string()),
                    serial: None,
                }],
                ProbeId::Ps => vec![Evidence::Process {
                    name: "vrserver".to_string(),
                }],
                _ => Vec::new(),
            };
            Arc::new(StaticProbe { id, findings }) as Arc<dyn Probe>
        })
        .unwrap();

        let orchestrator = DetectionOrchestrator::new(
            chains,
            ProbeContext::bare(Os::Linux, Duration::from_secs(1)),
        );
        let monitor = DetectionMonitor::new(orchestrator, MonitorConfig::default()).unwrap();
        Arc::new(AppState::with_monitor(Arc::new(monitor), Config::default()))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_before_first_cycle_is_empty() {
        let state = test_state();
        let response = get_snapshot(State(state)).await.into_response();
        let snapshot: Snapshot = body_json(response).await;
        assert_eq!(snapshot.cycle, 0);
        assert!(snapshot.devices.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_returns_diff_and_updates_reads() {
        let state = test_state();
        state.monitor.refresh_now(&CancellationToken::new()).await.unwrap();

        let response = list_devices(State(state.clone())).await.into_response();
        let devices: Vec<DeviceRecord> = body_json(response).await;
        assert_eq!(devices.len(), 1);

        let key = devices[0].key.as_str().to_string();
        let (vendor, model) = key.split_once('/').unwrap();
        let response = get_device(State(state.clone()), Path((vendor.to_string(), model.to_string())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = list_platforms(State(state.clone()), Query(PlatformQuery::default()))
            .await
            .into_response();
        let platforms: Vec<PlatformRecord> = body_json(response).await;
        assert!(platforms.iter().any(|p| p.running));
    }

    #[tokio::test]
    async fn test_status_and_platform_views() {
        let state = test_state();
        state.monitor.refresh_now(&CancellationToken::new()).await.unwrap();

        let response = get_status(State(state.clone())).await.into_response();
        let status: serde_json::Value = body_json(response).await;
        assert_eq!(status["vr_ready"], true);
        assert_eq!(status["primary_device"]["model"], "Index");
        assert_eq!(status["running_platforms"], serde_json::json!(["steam_vr"]));
        assert_eq!(status["idle_platforms"], serde_json::json!([]));

        let response = list_platforms(State(state.clone()), Query(PlatformQuery { running: true }))
            .await
            .into_response();
        let running: Vec<PlatformRecord> = body_json(response).await;
        assert_eq!(running.len(), 1);

        let response = get_platform(State(state.clone()), Path(PlatformId::SteamVr))
            .await
            .into_response();
        let view: serde_json::Value = body_json(response).await;
        assert_eq!(view["platform_id"], "steam_vr");
        assert!(view["watched_processes"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("vrserver")));

        let response = get_platform(State(state), Path(PlatformId::Monado)).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trigger_refresh_serves_cycle() {
        let state = test_state();
        let monitor = state.monitor.clone();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let runner = tokio::spawn(async move { monitor.run(loop_cancel).await });

        let response = trigger_refresh(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let diff: Diff = body_json(response).await;
        assert!(diff.cycle >= 1);

        cancel.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let state = test_state();
        let response = get_device(State(state), Path(("meta".to_string(), "quest-9".to_string())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_diagnostics_reports_clean_cycle() {
        let state = test_state();
        state.monitor.refresh_now(&CancellationToken::new()).await.unwrap();

        let response = get_diagnostics(State(state)).await.into_response();
        let view: serde_json::Value = body_json(response).await;
        assert_eq!(view["cycle"], 1);
        assert_eq!(view["degraded"], false);
        assert!(view["incomplete_devices"].as_object().unwrap().is_empty());
    }
}
