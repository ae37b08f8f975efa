//! Upload throughput sampling with adaptive payload sizing.
//!
//! The payload size is not fixed: a small probe upload first estimates
//! the link, then a tier matched to the probed speed is uploaded several
//! times and the final-size samples are reduced to their median. Mixing
//! sizes in the reduction would mix different overhead ratios, so the
//! probe sample is excluded; it only steers tier selection (and serves as
//! a last-resort fallback when every repetition is implausible).

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::sleep;

use crate::client::TransferClient;
use crate::errors::{MeasureError, Result};
use crate::measure::CancelToken;
use crate::progress::{BandwidthDirection, ProgressEvent, ProgressGauge, ProgressSink};
use crate::results::PhaseResult;
use crate::stats::median;

/// Discrete payload-size buckets served by the test server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PayloadTier {
    /// 1 MiB, the probe payload.
    Mb1,
    /// 2 MiB.
    Mb2,
    /// 4 MiB.
    Mb4,
    /// 5 MiB, the slow-connection tier.
    Mb5,
    /// 10 MiB, the mid-speed tier.
    Mb10,
    /// 25 MiB, the largest tier.
    Mb25,
}

impl PayloadTier {
    /// Every tier, smallest first.
    pub const ALL: [PayloadTier; 6] = [
        PayloadTier::Mb1,
        PayloadTier::Mb2,
        PayloadTier::Mb4,
        PayloadTier::Mb5,
        PayloadTier::Mb10,
        PayloadTier::Mb25,
    ];

    /// Nominal size in MiB.
    pub fn megabytes(&self) -> u64 {
        match self {
            PayloadTier::Mb1 => 1,
            PayloadTier::Mb2 => 2,
            PayloadTier::Mb4 => 4,
            PayloadTier::Mb5 => 5,
            PayloadTier::Mb10 => 10,
            PayloadTier::Mb25 => 25,
        }
    }

    /// Size in bytes.
    pub fn bytes(&self) -> u64 {
        self.megabytes() * 1024 * 1024
    }

    /// Tier matched to a probed upload speed: slow links get small
    /// payloads so the phase stays bounded, fast links get enough bytes
    /// for the timing to be meaningful.
    pub fn for_probe_speed(speed_mbps: f64) -> Self {
        if speed_mbps < 5.0 {
            PayloadTier::Mb5
        } else if speed_mbps < 20.0 {
            PayloadTier::Mb10
        } else {
            PayloadTier::Mb25
        }
    }

    /// The largest tier not exceeding `max_bytes`, falling back to the
    /// smallest tier when even that exceeds the ceiling.
    pub fn clamped(self, max_bytes: u64) -> Self {
        if self.bytes() <= max_bytes {
            return self;
        }

        Self::ALL
            .iter()
            .rev()
            .find(|tier| tier.bytes() <= max_bytes)
            .copied()
            .unwrap_or(PayloadTier::Mb1)
    }
}

/// Upload sampler parameters.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Repetitions at the selected tier. Default: 3
    pub repetitions: usize,
    /// Pause between repetitions. Default: 1000ms
    pub pause: Duration,
    /// Ceiling on transferable payload size imposed by the serving
    /// environment. Default: 25 MiB
    pub max_payload_bytes: u64,
    /// Samples at or above this speed are degenerate (zero-duration
    /// measurements) and are discarded. Default: 1000 Mbps
    pub sanity_ceiling_mbps: f64,
    /// Gauge step per completed upload. Default: 5
    pub progress_step: f64,
    /// Gauge ceiling for this phase. Default: 100
    pub progress_cap: f64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            repetitions: 3,
            pause: Duration::from_millis(1000),
            max_payload_bytes: PayloadTier::Mb25.bytes(),
            sanity_ceiling_mbps: 1000.0,
            progress_step: 5.0,
            progress_cap: 100.0,
        }
    }
}

/// The upload throughput sampler.
#[derive(Debug, Clone)]
pub struct UploadSampler {
    config: UploadConfig,
}

impl UploadSampler {
    /// Create a sampler with the given parameters.
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    /// Run the probe-then-repeat sequence and reduce it to an upload
    /// phase result.
    ///
    /// Any payload fetch or upload failure aborts the phase; no partial
    /// or degraded result is synthesized from the samples gathered so far.
    pub async fn run(
        &self,
        client: &TransferClient,
        sink: &ProgressSink,
        gauge: &ProgressGauge,
        cancel: &CancelToken,
    ) -> Result<PhaseResult> {
        cancel.checkpoint()?;

        // Probe: one small upload to estimate the link.
        let probe_payload =
            client.fetch_payload(PayloadTier::Mb1.megabytes()).await?;
        cancel.checkpoint()?;

        let (probe_echo, _) = client.upload(probe_payload).await?;
        cancel.checkpoint()?;

        let probe_mbps = probe_echo.speed;
        debug!("upload probe: {:.2} Mbps", probe_mbps);

        sink.emit(ProgressEvent::SpeedSample {
            direction: BandwidthDirection::Upload,
            speed_mbps: probe_mbps,
            current: 1,
            total: self.config.repetitions + 1,
        });
        sink.emit(ProgressEvent::OverallProgress(gauge.advance(
            self.config.progress_step,
            self.config.progress_cap,
        )));

        let tier = PayloadTier::for_probe_speed(probe_mbps)
            .clamped(self.config.max_payload_bytes);
        info!(
            "upload tier: {} MiB (probe {:.2} Mbps)",
            tier.megabytes(),
            probe_mbps
        );

        let payload = client.fetch_payload(tier.megabytes()).await?;
        let mut samples = Vec::with_capacity(self.config.repetitions);

        for i in 0..self.config.repetitions {
            cancel.checkpoint()?;

            let (echo, elapsed) = client.upload(payload.clone()).await?;
            cancel.checkpoint()?;

            debug!(
                "upload {}/{}: {:.2} Mbps in {:.3} s",
                i + 1,
                self.config.repetitions,
                echo.speed,
                elapsed.as_secs_f64()
            );

            if plausible(echo.speed, self.config.sanity_ceiling_mbps) {
                samples.push(echo.speed);
                sink.emit(ProgressEvent::SpeedSample {
                    direction: BandwidthDirection::Upload,
                    speed_mbps: echo.speed,
                    current: i + 2,
                    total: self.config.repetitions + 1,
                });
            } else {
                warn!(
                    "discarding implausible upload sample: {:.2} Mbps",
                    echo.speed
                );
            }

            sink.emit(ProgressEvent::OverallProgress(gauge.advance(
                self.config.progress_step,
                self.config.progress_cap,
            )));

            if i + 1 < self.config.repetitions {
                sleep(self.config.pause).await;
            }
        }

        let speed =
            reduce(&samples, probe_mbps, self.config.sanity_ceiling_mbps)?;
        info!(
            "upload: {:.2} Mbps (median of {} valid samples)",
            speed,
            samples.len()
        );

        Ok(PhaseResult::upload(speed))
    }
}

fn plausible(speed_mbps: f64, ceiling: f64) -> bool {
    speed_mbps.is_finite() && speed_mbps >= 0.0 && speed_mbps < ceiling
}

/// Reduce the valid final-size samples to the reported upload speed.
///
/// The probe sample is excluded from the median; it is used only when the
/// sanity filter discarded every repetition, and the phase fails outright
/// when the probe itself is implausible too.
pub fn reduce(
    valid_samples: &[f64],
    probe_mbps: f64,
    sanity_ceiling_mbps: f64,
) -> Result<f64> {
    if let Some(speed) = median(valid_samples) {
        return Ok(speed);
    }

    if plausible(probe_mbps, sanity_ceiling_mbps) {
        warn!(
            "no valid final-size upload samples, falling back to probe: {:.2} Mbps",
            probe_mbps
        );
        return Ok(probe_mbps);
    }

    Err(MeasureError::measurement(
        "every upload sample was discarded as implausible",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection_thresholds() {
        assert_eq!(PayloadTier::for_probe_speed(1.9), PayloadTier::Mb5);
        assert_eq!(PayloadTier::for_probe_speed(4.9), PayloadTier::Mb5);
        assert_eq!(PayloadTier::for_probe_speed(5.0), PayloadTier::Mb10);
        assert_eq!(PayloadTier::for_probe_speed(19.9), PayloadTier::Mb10);
        assert_eq!(PayloadTier::for_probe_speed(20.0), PayloadTier::Mb25);
        assert_eq!(PayloadTier::for_probe_speed(500.0), PayloadTier::Mb25);
    }

    #[test]
    fn test_tier_clamped_to_platform_ceiling() {
        // 25 MiB exceeds a 12 MiB ceiling; the 10 MiB tier is the
        // largest that fits.
        let tier = PayloadTier::Mb25.clamped(12 * 1024 * 1024);
        assert_eq!(tier, PayloadTier::Mb10);

        // A ceiling below every tier falls back to the smallest.
        assert_eq!(PayloadTier::Mb5.clamped(1000), PayloadTier::Mb1);

        // A generous ceiling leaves the tier alone.
        assert_eq!(
            PayloadTier::Mb25.clamped(100 * 1024 * 1024),
            PayloadTier::Mb25
        );
    }

    #[test]
    fn test_tier_sizes() {
        assert_eq!(PayloadTier::Mb1.bytes(), 1_048_576);
        assert_eq!(PayloadTier::Mb25.bytes(), 26_214_400);
    }

    #[test]
    fn test_reduce_median_of_three() {
        let speed = reduce(&[8.2, 9.9, 7.5], 6.0, 1000.0).expect("median");
        assert!((speed - 8.2).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_even_count_after_filtering() {
        // [5, 1500, 6] with the 1500 Mbps sample already discarded by the
        // sanity filter leaves [5, 6]; the even-count median averages.
        let speed = reduce(&[5.0, 6.0], 4.0, 1000.0).expect("median");
        assert!((speed - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_falls_back_to_probe() {
        let speed = reduce(&[], 6.5, 1000.0).expect("probe fallback");
        assert!((speed - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_fails_without_any_plausible_sample() {
        let result = reduce(&[], 1500.0, 1000.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_plausibility_filter() {
        assert!(plausible(999.9, 1000.0));
        assert!(!plausible(1000.0, 1000.0));
        assert!(!plausible(1500.0, 1000.0));
        assert!(!plausible(f64::NAN, 1000.0));
        assert!(!plausible(f64::INFINITY, 1000.0));
    }

    #[test]
    fn test_default_config_matches_protocol() {
        let config = UploadConfig::default();
        assert_eq!(config.repetitions, 3);
        assert_eq!(config.pause, Duration::from_millis(1000));
        assert_eq!(config.max_payload_bytes, 25 * 1024 * 1024);
        assert!((config.sanity_ceiling_mbps - 1000.0).abs() < 1e-9);
    }
}
