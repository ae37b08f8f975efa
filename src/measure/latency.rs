//! Latency sampling and outlier-trimmed reduction.
//!
//! Issues a fixed number of sequential zero-payload probes with a fixed
//! inter-probe delay, then strips the extremes before averaging: the
//! first probes carry connection setup cost and any probe can catch a
//! transient spike, and dropping both ends removes them without a more
//! complex filter.

use std::time::Duration;

use log::{debug, info};
use tokio::time::sleep;

use crate::client::TransferClient;
use crate::errors::Result;
use crate::measure::CancelToken;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::results::PhaseResult;
use crate::stats::mean;

/// One latency probe's raw sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    /// Measured round-trip time in milliseconds.
    pub latency_ms: f64,
    /// Server-reported jitter in milliseconds.
    pub jitter_ms: f64,
}

/// Latency sampler parameters.
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Number of sequential probes. Default: 8
    pub probes: usize,
    /// Delay between consecutive probes, to avoid queuing artifacts.
    /// Default: 200ms
    pub spacing: Duration,
    /// Samples trimmed from each end of the latency-sorted list.
    /// Default: 2
    pub trim: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self { probes: 8, spacing: Duration::from_millis(200), trim: 2 }
    }
}

/// The latency sampler.
#[derive(Debug, Clone)]
pub struct LatencySampler {
    config: LatencyConfig,
}

impl LatencySampler {
    /// Create a sampler with the given parameters.
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    /// Run the probe sequence and reduce it to a ping phase result.
    pub async fn run(
        &self,
        client: &TransferClient,
        sink: &ProgressSink,
        cancel: &CancelToken,
    ) -> Result<PhaseResult> {
        let total = self.config.probes;
        let mut samples = Vec::with_capacity(total);

        for i in 0..total {
            cancel.checkpoint()?;

            let timing = client.probe().await?;
            cancel.checkpoint()?;

            let sample = LatencySample {
                latency_ms: timing.elapsed_ms,
                jitter_ms: timing.jitter_ms,
            };
            debug!(
                "latency probe {}/{}: {:.2} ms",
                i + 1,
                total,
                sample.latency_ms
            );
            samples.push(sample);

            sink.emit(ProgressEvent::LatencySample {
                latency_ms: sample.latency_ms,
                jitter_ms: sample.jitter_ms,
                current: i + 1,
                total,
            });

            if i + 1 < total {
                sleep(self.config.spacing).await;
            }
        }

        let (ping, jitter) = reduce(&samples, self.config.trim);
        info!("ping: {:.2} ms, jitter: {:.2} ms", ping, jitter);

        Ok(PhaseResult::ping(ping, jitter))
    }
}

/// Trimmed-mean reduction over latency samples.
///
/// Sorts by latency and drops `trim` samples from each end before
/// averaging. With too few samples to leave anything meaningful after
/// trimming (fewer than `2 * trim + 1` collected), all samples are used
/// instead; an empty input reduces to zeroes rather than failing.
pub fn reduce(samples: &[LatencySample], trim: usize) -> (f64, f64) {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms));

    let retained = if sorted.len() > 2 * trim {
        &sorted[trim..sorted.len() - trim]
    } else {
        &sorted[..]
    };

    let latencies: Vec<f64> =
        retained.iter().map(|sample| sample.latency_ms).collect();
    let jitters: Vec<f64> =
        retained.iter().map(|sample| sample.jitter_ms).collect();

    (mean(&latencies).unwrap_or(0.0), mean(&jitters).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(latencies: &[f64]) -> Vec<LatencySample> {
        latencies
            .iter()
            .map(|&latency_ms| LatencySample { latency_ms, jitter_ms: 2.0 })
            .collect()
    }

    #[test]
    fn test_reduce_trims_two_from_each_end() {
        let input = samples(&[50.0, 12.0, 15.0, 14.0, 13.0, 90.0, 16.0, 11.0]);
        let (ping, jitter) = reduce(&input, 2);

        // Sorted: [11,12,13,14,15,16,50,90]; middle four are [13,14,15,16].
        assert!((ping - 14.5).abs() < 1e-9);
        assert!((jitter - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_averages_jitter_of_retained_samples() {
        let input = vec![
            LatencySample { latency_ms: 1.0, jitter_ms: 100.0 },
            LatencySample { latency_ms: 10.0, jitter_ms: 3.0 },
            LatencySample { latency_ms: 11.0, jitter_ms: 5.0 },
            LatencySample { latency_ms: 12.0, jitter_ms: 4.0 },
            LatencySample { latency_ms: 90.0, jitter_ms: 100.0 },
        ];

        let (_, jitter) = reduce(&input, 1);
        assert!((jitter - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_falls_back_below_trim_threshold() {
        // Four samples cannot survive a 2+2 trim; all are used.
        let input = samples(&[10.0, 20.0, 30.0, 40.0]);
        let (ping, _) = reduce(&input, 2);

        assert!((ping - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_empty_input_yields_zeroes() {
        assert_eq!(reduce(&[], 2), (0.0, 0.0));
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let input = samples(&[50.0, 12.0, 15.0, 14.0, 13.0, 90.0, 16.0, 11.0]);
        assert_eq!(reduce(&input, 2), reduce(&input, 2));
    }

    #[test]
    fn test_default_config_matches_protocol() {
        let config = LatencyConfig::default();
        assert_eq!(config.probes, 8);
        assert_eq!(config.spacing, Duration::from_millis(200));
        assert_eq!(config.trim, 2);
    }
}
