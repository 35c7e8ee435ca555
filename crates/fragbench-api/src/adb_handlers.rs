//! Device maintenance handlers mounted under `/adb`.
//!
//! Short operations claim the device for the duration of the request;
//! fill, drain and fragmentation run as background jobs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use fragbench_device::{AdbClient, DeviceInfo};
use fragbench_metrics::render_prometheus;
use fragbench_occupancy::OccupancyError;

use crate::ApiState;
use crate::jobs::{JobInfo, JobKind};
use crate::response::{ApiResponse, busy, error_response, failure, reply};

fn adb_client(state: &ApiState) -> Result<&AdbClient, Response> {
    state.adb.as_ref().ok_or_else(|| {
        error_response("adb is not initialized", StatusCode::SERVICE_UNAVAILABLE).into_response()
    })
}

fn accepted(info: JobInfo) -> Response {
    (StatusCode::ACCEPTED, ApiResponse::ok(info)).into_response()
}

// ── Devices ────────────────────────────────────────────────────

/// GET /adb/devices
pub async fn list_devices(State(state): State<ApiState>) -> Response {
    let adb = match adb_client(&state) {
        Ok(adb) => adb,
        Err(resp) => return resp,
    };
    let selected = state.selected.read().await.clone();
    match adb.list_devices().await {
        Ok(devices) => {
            let devices: Vec<DeviceInfo> = devices
                .into_iter()
                .map(|mut d| {
                    d.selected = selected.as_deref() == Some(d.udid.as_str());
                    d
                })
                .collect();
            ApiResponse::ok(devices).into_response()
        }
        Err(e) => failure(e),
    }
}

/// GET /adb/devices/selected
pub async fn selected_device(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.selected.read().await.clone()).into_response()
}

/// POST /adb/devices/{id}/select
pub async fn select_device(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let adb = match adb_client(&state) {
        Ok(adb) => adb,
        Err(resp) => return resp,
    };
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    match adb.connect(Some(&id), state.config.device.root).await {
        Ok(connected) => {
            device.replace(Box::new(connected));
            *state.selected.write().await = Some(id.clone());
            info!(serial = %id, "device selected");
            ApiResponse::ok(id).into_response()
        }
        Err(e) => failure(e),
    }
}

/// POST /adb/device/connect-over-wifi
pub async fn connect_over_wifi(State(state): State<ApiState>) -> Response {
    let adb = match adb_client(&state) {
        Ok(adb) => adb,
        Err(resp) => return resp,
    };
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    match adb.connect_over_wifi(&mut device).await {
        Ok(connected) => {
            let serial = connected.serial().to_string();
            device.replace(Box::new(connected));
            *state.selected.write().await = Some(serial.clone());
            ApiResponse::ok(serial).into_response()
        }
        Err(e) => failure(e),
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetParams {
    pub target_percentage: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchParams {
    pub batches: u32,
    pub img_ratio: u32,
    pub xmp_ratio: u32,
}

/// GET /adb/storage/percentage
pub async fn storage_percentage(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(device.occupancy().await)
}

/// POST /adb/storage/generate-batch?batches=100&imgRatio=1&xmpRatio=1
pub async fn generate_batch(
    State(state): State<ApiState>,
    Query(params): Query<BatchParams>,
) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(
        state
            .media
            .generate_batch(&mut device, params.batches, params.img_ratio, params.xmp_ratio)
            .await,
    )
}

async fn spawn_convergence(state: ApiState, kind: JobKind, target: f64) -> Response {
    if !(0.0..=100.0).contains(&target) {
        return failure(OccupancyError::InvalidTarget(target));
    }
    let controller = state.controller.clone();
    let spawned = state
        .jobs
        .spawn(kind, None, move |mut device, cancel| async move {
            if kind == JobKind::Fill {
                controller.fill(&mut device, target, &cancel).await
            } else {
                controller.drain(&mut device, target, &cancel).await
            }
        })
        .await;
    match spawned {
        Ok((info, _)) => accepted(info),
        Err(_) => busy(),
    }
}

/// POST /adb/storage/fill?targetPercentage=40
pub async fn fill_storage(
    State(state): State<ApiState>,
    Query(params): Query<TargetParams>,
) -> Response {
    spawn_convergence(state, JobKind::Fill, params.target_percentage).await
}

/// POST /adb/storage/drain?targetPercentage=10
pub async fn drain_storage(
    State(state): State<ApiState>,
    Query(params): Query<TargetParams>,
) -> Response {
    spawn_convergence(state, JobKind::Drain, params.target_percentage).await
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /adb/metrics
///
/// Empty body while metrics are switched off.
pub async fn prometheus_metrics(State(state): State<ApiState>) -> Response {
    if !state.metrics.is_enabled() {
        return StatusCode::OK.into_response();
    }
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    match state.sampler.sample(&mut device).await {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            render_prometheus(&metrics),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

#[derive(Serialize)]
struct MetricsState {
    enabled: bool,
}

/// PATCH /adb/metrics/on
pub async fn metrics_on(State(state): State<ApiState>) -> Response {
    state.metrics.set(true);
    ApiResponse::ok(MetricsState { enabled: true }).into_response()
}

/// PATCH /adb/metrics/off
pub async fn metrics_off(State(state): State<ApiState>) -> Response {
    state.metrics.set(false);
    ApiResponse::ok(MetricsState { enabled: false }).into_response()
}

// ── Media database ─────────────────────────────────────────────

/// GET /adb/external-db/pending-count
pub async fn pending_count(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.pending_count(&mut device).await)
}

/// GET /adb/external-db/image-count
pub async fn image_count(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.image_count(&mut device).await)
}

/// GET /adb/external-db/fragmentation
pub async fn fragmentation(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.fragmentation_extents(&mut device).await)
}

/// POST /adb/external-db/trigger
pub async fn create_trigger(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.create_trigger(&mut device).await)
}

/// DELETE /adb/external-db/trigger
pub async fn drop_trigger(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.drop_trigger(&mut device).await)
}

#[derive(Debug, Deserialize)]
pub struct FragmentateParams {
    #[serde(default = "default_transactions")]
    pub batches: u32,
    #[serde(default = "default_updates")]
    pub updates: u32,
}

fn default_transactions() -> u32 {
    100
}

fn default_updates() -> u32 {
    10
}

/// POST /adb/external-db/fragmentate
pub async fn fragmentate(
    State(state): State<ApiState>,
    Query(params): Query<FragmentateParams>,
) -> Response {
    let media = state.media.clone();
    let spawned = state
        .jobs
        .spawn(JobKind::Fragmentate, None, move |mut device, _cancel| async move {
            media
                .fragmentate(&mut device, params.batches, params.updates)
                .await
        })
        .await;
    match spawned {
        Ok((info, _)) => accepted(info),
        Err(_) => busy(),
    }
}

/// GET /adb/fs/image-count
pub async fn fs_image_count(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.fs_image_count(&mut device).await)
}

/// POST /adb/force-pending-to-0
pub async fn force_pending_to_zero(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.force_pending_to_zero(&mut device).await)
}

// ── Device control ─────────────────────────────────────────────

/// POST /adb/drop-cache
pub async fn drop_cache(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(device.drop_cache().await)
}

/// POST /adb/broadcast-refresh
pub async fn broadcast_refresh(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.media.broadcast_refresh(&mut device).await)
}

/// POST /adb/reboot
pub async fn reboot(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(device.reboot().await)
}

/// PUT /adb/push-query
pub async fn push_query(State(state): State<ApiState>) -> Response {
    let Ok(mut device) = state.jobs.try_device() else {
        return busy();
    };
    reply(state.pipeline.push_queries(&mut device).await)
}
