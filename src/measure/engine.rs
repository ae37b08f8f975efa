//! The test engine: sequences the three samplers into one run.
//!
//! Phases run strictly one after another — concurrent download and
//! upload transfers would contend for bandwidth and invalidate both
//! measurements. The engine owns the overall progress gauge, checks the
//! cancellation token between phases (the samplers check it at every
//! suspension point inside a phase), and on full success packages the
//! three phase outputs into a [`TestResult`].

use log::{debug, info};

use crate::client::TransferClient;
use crate::errors::Result;
use crate::identity::NetworkIdentity;
use crate::measure::download::{DownloadConfig, DownloadSampler};
use crate::measure::latency::{LatencyConfig, LatencySampler};
use crate::measure::upload::{UploadConfig, UploadSampler};
use crate::measure::CancelToken;
use crate::progress::{ProgressEvent, ProgressGauge, ProgressSink, TestPhase};
use crate::results::TestResult;

/// Configuration for a full measurement run.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Latency phase parameters.
    pub latency: LatencyConfig,
    /// Download phase parameters.
    pub download: DownloadConfig,
    /// Upload phase parameters.
    pub upload: UploadConfig,
}

/// Orchestrates one end-to-end measurement run.
pub struct TestEngine {
    client: TransferClient,
    config: TestConfig,
    sink: ProgressSink,
    gauge: ProgressGauge,
    cancel: CancelToken,
}

impl TestEngine {
    /// Create an engine measuring against `client`'s server.
    pub fn new(client: TransferClient, config: TestConfig) -> Self {
        Self {
            client,
            config,
            sink: ProgressSink::new(),
            gauge: ProgressGauge::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Subscribe to this engine's progress events.
    pub fn subscribe(
        &self,
    ) -> tokio::sync::mpsc::UnboundedReceiver<ProgressEvent> {
        self.sink.subscribe()
    }

    /// A token that cancels this engine's run when fired.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run ping, download, and upload in order and assemble the result.
    ///
    /// Any phase error abandons the remaining phases and returns the
    /// engine to idle without producing a `TestResult`. The identity
    /// fields come from the caller; the engine does not discover them.
    pub async fn run(&self, identity: NetworkIdentity) -> Result<TestResult> {
        info!("starting measurement run against {}", self.client.base_url());

        match self.run_phases(identity).await {
            Ok(result) => {
                self.enter_phase(TestPhase::Complete, 100.0);
                info!(
                    "run complete: ping {:.2} ms, download {:.2} Mbps, upload {:.2} Mbps",
                    result.ping, result.download, result.upload
                );
                Ok(result)
            }
            Err(error) => {
                self.sink.emit(ProgressEvent::PhaseChange(TestPhase::Idle));
                Err(error)
            }
        }
    }

    async fn run_phases(
        &self,
        identity: NetworkIdentity,
    ) -> Result<TestResult> {
        self.cancel.checkpoint()?;

        self.enter_phase(TestPhase::Ping, 10.0);
        let ping = LatencySampler::new(self.config.latency.clone())
            .run(&self.client, &self.sink, &self.cancel)
            .await?;
        self.sink.emit(ProgressEvent::PhaseComplete(TestPhase::Ping));

        self.cancel.checkpoint()?;

        self.enter_phase(TestPhase::Download, 30.0);
        let download = DownloadSampler::new(self.config.download.clone())
            .run(&self.client, &self.sink, &self.gauge, &self.cancel)
            .await?;
        self.sink.emit(ProgressEvent::PhaseComplete(TestPhase::Download));

        self.cancel.checkpoint()?;

        self.enter_phase(TestPhase::Upload, 60.0);
        let upload = UploadSampler::new(self.config.upload.clone())
            .run(&self.client, &self.sink, &self.gauge, &self.cancel)
            .await?;
        self.sink.emit(ProgressEvent::PhaseComplete(TestPhase::Upload));

        self.cancel.checkpoint()?;

        TestResult::new(
            identity,
            ping.primary,
            ping.secondary.unwrap_or(0.0),
            download.primary,
            upload.primary,
        )
    }

    fn enter_phase(&self, phase: TestPhase, floor: f64) {
        debug!("entering phase {:?}", phase);
        self.sink.emit(ProgressEvent::PhaseChange(phase));
        self.sink
            .emit(ProgressEvent::OverallProgress(self.gauge.set_floor(floor)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_covers_all_phases() {
        let config = TestConfig::default();
        assert_eq!(config.latency.probes, 8);
        assert_eq!(config.download.transfers, 8);
        assert_eq!(config.upload.repetitions, 3);
    }

    #[tokio::test]
    async fn test_cancelled_engine_emits_no_phase_events() {
        let client = TransferClient::new(
            url::Url::parse("http://127.0.0.1:9").expect("url"),
        );
        let engine = TestEngine::new(client, TestConfig::default());
        let mut events = engine.subscribe();

        engine.cancel_token().cancel();
        let result = engine.run(NetworkIdentity::unknown()).await;

        let error = result.expect_err("cancelled run must fail");
        assert_eq!(error.kind, crate::errors::ErrorKind::Aborted);

        // The failure path reports the return to idle and nothing else.
        assert!(matches!(
            events.recv().await,
            Some(ProgressEvent::PhaseChange(TestPhase::Idle))
        ));
        assert!(events.try_recv().is_err());
    }
}
