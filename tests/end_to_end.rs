//! End-to-end tests: boot the synthetic server in-process and drive the
//! engine against it over real sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::head;
use axum::Router;

use linespeed::client::TransferClient;
use linespeed::errors::ErrorKind;
use linespeed::identity::NetworkIdentity;
use linespeed::measure::{TestConfig, TestEngine};
use linespeed::progress::{BandwidthDirection, ProgressEvent, TestPhase};
use linespeed::server::{
    NetworkConditions, ServerConfig, SpawnedServer, TestServer,
};

/// Deterministic server on an ephemeral port.
async fn spawn_deterministic() -> SpawnedServer {
    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().expect("addr"),
        seed: Some(1),
        conditions: NetworkConditions::deterministic(),
        ..Default::default()
    };

    TestServer::new(config).spawn().await.expect("spawn server")
}

/// Test config with the inter-sample pauses shrunk so runs stay fast.
fn fast_config() -> TestConfig {
    let mut config = TestConfig::default();
    config.latency.spacing = Duration::from_millis(5);
    config.download.pause = Duration::from_millis(5);
    config.upload.pause = Duration::from_millis(20);
    config
}

fn drain(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn deterministic_full_run_pins_the_reported_metrics() {
    let server = spawn_deterministic().await;
    let client = TransferClient::new(server.url());

    let identity =
        NetworkIdentity::fetch(client.http(), client.base_url()).await;
    assert_eq!(identity.ip, "127.0.0.1");
    assert_eq!(identity.server, "Local Server");

    let engine = TestEngine::new(client, fast_config());
    let mut events = engine.subscribe();

    let result = engine.run(identity).await.expect("full run");

    // Upload is clamped to exactly 8 Mbps by the pinned envelope, and
    // jitter is the mean of identical fixed headers.
    assert!((result.upload - 8.0).abs() < 1e-9, "upload {}", result.upload);
    assert!((result.jitter - 2.0).abs() < 1e-9, "jitter {}", result.jitter);

    // Each download is shaped to 50 Mbps; client-side overhead only
    // pulls the measured value down.
    assert!(
        result.download > 30.0 && result.download <= 50.5,
        "download {}",
        result.download
    );

    // Probes are delayed 10 ± 2 ms; the trimmed mean lands near that.
    assert!(
        result.ping >= 8.0 && result.ping < 100.0,
        "ping {}",
        result.ping
    );

    // Phase events arrive strictly in run order.
    let phases: Vec<TestPhase> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::PhaseChange(phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            TestPhase::Ping,
            TestPhase::Download,
            TestPhase::Upload,
            TestPhase::Complete
        ]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn overall_progress_is_monotone_and_reaches_completion() {
    let server = spawn_deterministic().await;
    let client = TransferClient::new(server.url());

    let engine = TestEngine::new(client, fast_config());
    let mut events = engine.subscribe();

    engine.run(NetworkIdentity::unknown()).await.expect("full run");

    let progress: Vec<f64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::OverallProgress(value) => Some(value),
            _ => None,
        })
        .collect();

    assert!(!progress.is_empty());
    assert!(
        progress.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress regressed: {:?}",
        progress
    );
    assert_eq!(*progress.last().expect("values"), 100.0);

    server.shutdown().await;
}

#[tokio::test]
async fn download_failure_aborts_the_run_before_upload() {
    // Probes succeed, downloads always fail.
    let app = Router::new().route(
        "/probe",
        head(|| async { StatusCode::OK })
            .get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let url = url::Url::parse(&format!("http://{}/", addr)).expect("url");
    let engine =
        TestEngine::new(TransferClient::new(url), fast_config());
    let mut events = engine.subscribe();

    let error = engine
        .run(NetworkIdentity::unknown())
        .await
        .expect_err("run must fail");
    assert_eq!(error.kind, ErrorKind::Transfer);

    let drained = drain(&mut events);

    // The ping phase completed, the upload phase never started, and the
    // failure path ends back at idle.
    assert!(drained.iter().any(|event| matches!(
        event,
        ProgressEvent::PhaseComplete(TestPhase::Ping)
    )));
    assert!(!drained.iter().any(|event| matches!(
        event,
        ProgressEvent::PhaseChange(TestPhase::Upload)
            | ProgressEvent::SpeedSample {
                direction: BandwidthDirection::Upload,
                ..
            }
    )));
    assert!(matches!(
        drained.last(),
        Some(ProgressEvent::PhaseChange(TestPhase::Idle))
    ));
}

#[tokio::test]
async fn cancellation_stops_the_run_without_a_result() {
    let server = spawn_deterministic().await;
    let client = TransferClient::new(server.url());

    let engine = Arc::new(TestEngine::new(client, fast_config()));
    let cancel = engine.cancel_token();
    let mut events = engine.subscribe();

    let run = {
        let engine = engine.clone();
        tokio::spawn(
            async move { engine.run(NetworkIdentity::unknown()).await },
        )
    };

    // Let the run produce at least one sample, then abandon it.
    loop {
        match events.recv().await.expect("events") {
            ProgressEvent::LatencySample { .. } => break,
            _ => continue,
        }
    }
    cancel.cancel();

    let error = run
        .await
        .expect("join")
        .expect_err("cancelled run must not produce a result");
    assert_eq!(error.kind, ErrorKind::Aborted);

    // Nothing after the return to idle.
    let drained = drain(&mut events);
    assert!(matches!(
        drained.last(),
        Some(ProgressEvent::PhaseChange(TestPhase::Idle))
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn same_seed_produces_identical_probe_headers() {
    async fn seeded_probe_headers(seed: u64) -> Vec<(f64, f64)> {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().expect("addr"),
            seed: Some(seed),
            ..Default::default()
        };
        let server = TestServer::new(config).spawn().await.expect("spawn");
        let client = TransferClient::new(server.url());

        let mut headers = Vec::new();
        for _ in 0..4 {
            let timing = client.probe().await.expect("probe");
            headers.push((timing.base_latency_ms, timing.jitter_ms));
        }

        server.shutdown().await;
        headers
    }

    let first = seeded_probe_headers(99).await;
    let second = seeded_probe_headers(99).await;

    assert_eq!(first, second);
}
