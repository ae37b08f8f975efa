//! Download throughput sampling and weighted-mean reduction.
//!
//! Runs a fixed count of sequential fixed-size downloads, emitting each
//! per-transfer speed the moment it is known so a consumer can animate a
//! live gauge. The reduction weights later samples more heavily because
//! early transfers are biased low by connection ramp-up.

use std::time::Duration;

use log::{debug, info};
use tokio::time::sleep;

use crate::client::TransferClient;
use crate::errors::Result;
use crate::measure::CancelToken;
use crate::progress::{BandwidthDirection, ProgressEvent, ProgressGauge, ProgressSink};
use crate::results::PhaseResult;
use crate::stats::weighted_mean;

/// Download sampler parameters.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Number of sequential transfers. Default: 8
    pub transfers: usize,
    /// Pause between transfers, so one saturated connection does not
    /// misrepresent steady-state throughput. Default: 50ms
    pub pause: Duration,
    /// Gauge step per completed transfer. Default: 4
    pub progress_step: f64,
    /// Gauge ceiling for this phase. Default: 60
    pub progress_cap: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            transfers: 8,
            pause: Duration::from_millis(50),
            progress_step: 4.0,
            progress_cap: 60.0,
        }
    }
}

/// The download throughput sampler.
#[derive(Debug, Clone)]
pub struct DownloadSampler {
    config: DownloadConfig,
}

impl DownloadSampler {
    /// Create a sampler with the given parameters.
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    /// Run the transfer sequence and reduce it to a download phase result.
    pub async fn run(
        &self,
        client: &TransferClient,
        sink: &ProgressSink,
        gauge: &ProgressGauge,
        cancel: &CancelToken,
    ) -> Result<PhaseResult> {
        let total = self.config.transfers;
        let mut speeds = Vec::with_capacity(total);

        for i in 0..total {
            cancel.checkpoint()?;

            let transfer = client.download().await?;
            cancel.checkpoint()?;

            let speed_mbps = transfer.speed_mbps();
            debug!(
                "download {}/{}: {} bytes, {:.2} Mbps",
                i + 1,
                total,
                transfer.bytes,
                speed_mbps
            );
            speeds.push(speed_mbps);

            sink.emit(ProgressEvent::SpeedSample {
                direction: BandwidthDirection::Download,
                speed_mbps,
                current: i + 1,
                total,
            });
            sink.emit(ProgressEvent::OverallProgress(gauge.advance(
                self.config.progress_step,
                self.config.progress_cap,
            )));

            if i + 1 < total {
                sleep(self.config.pause).await;
            }
        }

        let speed = weighted_mean(&speeds).unwrap_or(0.0);
        info!("download: {:.2} Mbps (weighted mean of {} samples)", speed, total);

        Ok(PhaseResult::download(speed))
    }
}
