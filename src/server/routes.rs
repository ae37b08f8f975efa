//! Route handlers of the synthetic test server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::debug;
use serde::Serialize;
use tokio::time::{sleep, Instant};

use super::ServerState;

/// `HEAD /probe`: artificial latency plus the envelope headers the
/// client folds into its jitter estimate.
pub(super) async fn probe_head(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let plan = state.shaper.probe_plan();
    sleep(plan.delay).await;

    [
        ("cache-control", "no-store".to_string()),
        ("x-base-latency", plan.base_latency_ms.to_string()),
        ("x-jitter", plan.jitter_ms.to_string()),
    ]
}

/// `GET /probe`: the fixed-size download payload, delayed to emulate a
/// bandwidth drawn from the download envelope.
pub(super) async fn probe_download(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let delay = state.shaper.download_delay(state.probe_payload.len() as u64);
    debug!("shaping download response over {:?}", delay);
    sleep(delay).await;

    (
        [
            ("content-type", "application/octet-stream"),
            ("cache-control", "no-store"),
        ],
        state.probe_payload.clone(),
    )
}

/// `GET /payload/{mb}`: static upload test payloads, served unshaped.
pub(super) async fn payload(
    State(state): State<Arc<ServerState>>,
    Path(megabytes): Path<u64>,
) -> impl IntoResponse {
    match state.payloads.get(&megabytes) {
        Some(payload) => (
            StatusCode::OK,
            [
                ("content-type", "application/octet-stream"),
                ("cache-control", "no-store"),
            ],
            payload.clone(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("no {} MiB test payload", megabytes),
        )
            .into_response(),
    }
}

/// The upload endpoint's JSON reply.
#[derive(Debug, Serialize)]
pub(super) struct UploadResponse {
    pub success: bool,
    pub size: u64,
    pub duration: f64,
    pub speed: f64,
    pub latency: f64,
    pub congestion: f64,
    pub processing_time: f64,
}

/// `POST /upload`: time the exchange, then report a speed shaped by the
/// upload envelope (congestion, variance, clamping, final fluctuation).
pub(super) async fn upload(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> impl IntoResponse {
    let size = body.len() as u64;
    drop(body);

    let plan = state.shaper.upload_plan(size);
    sleep(plan.processing).await;

    let start = Instant::now();
    sleep(plan.latency).await;
    let measured = start.elapsed();

    let outcome = state.shaper.upload_outcome(size, measured, plan);
    debug!(
        "shaped upload of {} bytes to {:.2} Mbps",
        size, outcome.speed_mbps
    );

    Json(UploadResponse {
        success: true,
        size,
        duration: outcome.duration_s,
        speed: outcome.speed_mbps,
        latency: round2(plan.latency.as_secs_f64() * 1000.0),
        congestion: round2(outcome.congestion),
        processing_time: round2(plan.processing.as_secs_f64() * 1000.0),
    })
}

#[derive(Debug, Serialize)]
pub(super) struct InfoResponse {
    pub success: bool,
    pub ip: String,
    pub isp: String,
    #[serde(rename = "dataCenter")]
    pub data_center: String,
}

/// `GET /info`: the identity fields a result is stamped with.
pub(super) async fn info(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    Json(InfoResponse {
        success: true,
        ip: addr.ip().to_string(),
        isp: state.isp.clone(),
        data_center: state.data_center.clone(),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
