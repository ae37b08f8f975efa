//! Synthetic network conditions and the shaping randomness behind them.
//!
//! The reference server does not measure real infrastructure; it draws
//! latency, jitter, and speed from configured envelopes and delays its
//! responses to match. All randomness flows through one seedable
//! [`Shaper`], so a pinned seed (or a zero-width envelope) reproduces
//! exact outputs for deterministic tests.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MIB: f64 = 1024.0 * 1024.0;

/// Envelope parameters bounding the server's synthetic behavior.
#[derive(Debug, Clone)]
pub struct NetworkConditions {
    /// Minimum probe latency in ms.
    pub latency_min_ms: f64,
    /// Maximum probe latency in ms.
    pub latency_max_ms: f64,
    /// Minimum jitter in ms.
    pub jitter_min_ms: f64,
    /// Maximum jitter in ms.
    pub jitter_max_ms: f64,

    /// Minimum download speed in Mbps.
    pub download_min_mbps: f64,
    /// Maximum download speed in Mbps.
    pub download_max_mbps: f64,
    /// Fractional variance applied to the drawn download speed.
    pub download_variance: f64,

    /// Fixed upload processing overhead in ms (plus up to 50% variance).
    pub upload_overhead_ms: f64,
    /// Lower clamp on the reported upload speed in Mbps.
    pub upload_min_mbps: f64,
    /// Upper clamp on the reported upload speed in Mbps.
    pub upload_max_mbps: f64,
    /// Base upload latency in ms before jitter and size effects.
    pub upload_base_latency_ms: f64,
    /// Fractional jitter applied to the upload base latency.
    pub upload_jitter_factor: f64,
    /// Multiplier on the size-progressive congestion effect.
    pub upload_congestion_factor: f64,
    /// Fractional variance applied to the computed upload speed.
    pub upload_speed_variance: f64,
    /// Fractional fluctuation applied after clamping.
    pub upload_final_fluctuation: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            latency_min_ms: 5.0,
            latency_max_ms: 20.0,
            jitter_min_ms: 1.0,
            jitter_max_ms: 5.0,
            download_min_mbps: 45.0,
            download_max_mbps: 65.0,
            download_variance: 0.15,
            upload_overhead_ms: 200.0,
            upload_min_mbps: 2.0,
            upload_max_mbps: 12.0,
            upload_base_latency_ms: 50.0,
            upload_jitter_factor: 0.3,
            upload_congestion_factor: 2.0,
            upload_speed_variance: 0.4,
            upload_final_fluctuation: 0.05,
        }
    }
}

impl NetworkConditions {
    /// Zero-width envelopes: every draw collapses to a fixed value, so
    /// responses are exactly reproducible. Latency pins to 10 ms, jitter
    /// to 2 ms, download to 50 Mbps, upload to 8 Mbps.
    pub fn deterministic() -> Self {
        Self {
            latency_min_ms: 10.0,
            latency_max_ms: 10.0,
            jitter_min_ms: 2.0,
            jitter_max_ms: 2.0,
            download_min_mbps: 50.0,
            download_max_mbps: 50.0,
            download_variance: 0.0,
            upload_overhead_ms: 0.0,
            upload_min_mbps: 8.0,
            upload_max_mbps: 8.0,
            upload_base_latency_ms: 0.0,
            upload_jitter_factor: 0.0,
            upload_congestion_factor: 0.0,
            upload_speed_variance: 0.0,
            upload_final_fluctuation: 0.0,
        }
    }
}

/// Delay plan for one latency probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbePlan {
    /// Artificial delay before responding.
    pub delay: Duration,
    /// Value for the `X-Base-Latency` header.
    pub base_latency_ms: f64,
    /// Value for the `X-Jitter` header.
    pub jitter_ms: f64,
}

/// Delay plan for one upload, split around the body timestamping the
/// way the shaping formulas expect.
#[derive(Debug, Clone, Copy)]
pub struct UploadPlan {
    /// Processing delay applied before the timed window opens.
    pub processing: Duration,
    /// Latency delay applied inside the timed window.
    pub latency: Duration,
}

/// Shaped outcome reported back to the uploading client.
#[derive(Debug, Clone, Copy)]
pub struct UploadOutcome {
    /// Emulated transfer duration in seconds.
    pub duration_s: f64,
    /// Reported speed in Mbps, rounded to two decimals.
    pub speed_mbps: f64,
    /// Congestion multiplier that was applied.
    pub congestion: f64,
}

/// Draws every synthetic value the server needs from one RNG.
#[derive(Debug)]
pub struct Shaper {
    conditions: NetworkConditions,
    rng: Mutex<StdRng>,
}

impl Shaper {
    /// Create a shaper over `conditions`, seeded for reproducibility or
    /// from entropy when no seed is given.
    pub fn new(conditions: NetworkConditions, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self { conditions, rng: Mutex::new(rng) }
    }

    /// The envelopes this shaper draws from.
    pub fn conditions(&self) -> &NetworkConditions {
        &self.conditions
    }

    fn draw(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }

        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(min..max)
    }

    fn draw_sign(&self) -> f64 {
        if self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(0.5)
        {
            1.0
        } else {
            -1.0
        }
    }

    /// Delay and headers for `HEAD /probe`.
    pub fn probe_plan(&self) -> ProbePlan {
        let c = &self.conditions;
        let base_latency_ms = self.draw(c.latency_min_ms, c.latency_max_ms);
        let jitter_ms = self.draw(c.jitter_min_ms, c.jitter_max_ms);
        let total = base_latency_ms + self.draw_sign() * jitter_ms;

        ProbePlan {
            delay: Duration::from_secs_f64(total.max(1.0) / 1000.0),
            base_latency_ms,
            jitter_ms,
        }
    }

    /// Delay for `GET /probe`, emulating a drawn bandwidth over
    /// `size_bytes` plus base latency.
    pub fn download_delay(&self, size_bytes: u64) -> Duration {
        let c = &self.conditions;
        let latency_ms = self.draw(c.latency_min_ms, c.latency_max_ms);

        let base_speed =
            self.draw(c.download_min_mbps, c.download_max_mbps);
        let variance =
            base_speed * c.download_variance * self.draw(-1.0, 1.0);
        let speed_mbps = (base_speed + variance).max(c.download_min_mbps);

        let megabits = size_bytes as f64 * 8.0 / 1e6;
        let transfer_ms = megabits / speed_mbps * 1000.0;

        Duration::from_secs_f64((latency_ms + transfer_ms) / 1000.0)
    }

    /// Delays for one upload of `size_bytes`.
    pub fn upload_plan(&self, size_bytes: u64) -> UploadPlan {
        let c = &self.conditions;

        let processing_ms =
            c.upload_overhead_ms * (1.0 + self.draw(0.0, 1.0) * 0.5);

        let jitter = 1.0 + self.draw(-1.0, 1.0) * c.upload_jitter_factor;
        let base_latency_ms = c.upload_base_latency_ms * jitter;
        // Extra latency per doubling of the payload size.
        let size_latency_ms =
            (size_bytes as f64 / MIB + 1.0).log2() * 20.0;

        UploadPlan {
            processing: Duration::from_secs_f64(processing_ms / 1000.0),
            latency: Duration::from_secs_f64(
                (base_latency_ms + size_latency_ms) / 1000.0,
            ),
        }
    }

    /// Shaped speed for an upload of `size_bytes` whose timed window
    /// measured `measured`, under the delays of `plan`.
    pub fn upload_outcome(
        &self,
        size_bytes: u64,
        measured: Duration,
        plan: UploadPlan,
    ) -> UploadOutcome {
        let c = &self.conditions;

        let overhead_s =
            plan.processing.as_secs_f64() + plan.latency.as_secs_f64();
        let base_duration_s = measured.as_secs_f64() + overhead_s;

        let congestion = ((size_bytes as f64 / MIB + 1.0).log2()
            * c.upload_congestion_factor)
            .max(1.0);
        let duration_s = base_duration_s * congestion;

        let mut speed_mbps = size_bytes as f64 * 8.0 / duration_s / 1e6;
        speed_mbps *= 1.0 + self.draw(-1.0, 1.0) * c.upload_speed_variance;
        speed_mbps = speed_mbps.clamp(c.upload_min_mbps, c.upload_max_mbps);
        speed_mbps *=
            1.0 + self.draw(-1.0, 1.0) * c.upload_final_fluctuation;

        UploadOutcome {
            duration_s,
            speed_mbps: (speed_mbps * 100.0).round() / 100.0,
            congestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_envelopes_match_reference() {
        let c = NetworkConditions::default();
        assert_eq!(c.latency_min_ms, 5.0);
        assert_eq!(c.latency_max_ms, 20.0);
        assert_eq!(c.download_min_mbps, 45.0);
        assert_eq!(c.download_max_mbps, 65.0);
        assert_eq!(c.upload_min_mbps, 2.0);
        assert_eq!(c.upload_max_mbps, 12.0);
    }

    #[test]
    fn test_same_seed_draws_identical_sequences() {
        let first = Shaper::new(NetworkConditions::default(), Some(7));
        let second = Shaper::new(NetworkConditions::default(), Some(7));

        for _ in 0..16 {
            let a = first.probe_plan();
            let b = second.probe_plan();
            assert_eq!(a.base_latency_ms, b.base_latency_ms);
            assert_eq!(a.jitter_ms, b.jitter_ms);
            assert_eq!(a.delay, b.delay);
        }

        assert_eq!(
            first.download_delay(2 * 1024 * 1024),
            second.download_delay(2 * 1024 * 1024)
        );
    }

    #[test]
    fn test_deterministic_probe_is_pinned() {
        let shaper = Shaper::new(NetworkConditions::deterministic(), None);

        let plan = shaper.probe_plan();
        assert_eq!(plan.base_latency_ms, 10.0);
        assert_eq!(plan.jitter_ms, 2.0);
        // 10 ± 2 ms, depending only on the sign draw.
        let delay_ms = plan.delay.as_secs_f64() * 1000.0;
        assert!(delay_ms == 8.0 || delay_ms == 12.0);
    }

    #[test]
    fn test_deterministic_download_emulates_fifty_mbps() {
        let shaper = Shaper::new(NetworkConditions::deterministic(), None);

        let size = 2 * 1024 * 1024u64;
        let delay = shaper.download_delay(size);

        let expected_transfer_s = size as f64 * 8.0 / 50e6;
        let expected = expected_transfer_s + 0.010;
        assert!((delay.as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_upload_clamps_to_eight() {
        let shaper = Shaper::new(NetworkConditions::deterministic(), None);

        let size = 10 * 1024 * 1024u64;
        let plan = shaper.upload_plan(size);
        let outcome =
            shaper.upload_outcome(size, Duration::from_millis(80), plan);

        assert_eq!(outcome.speed_mbps, 8.0);
        assert_eq!(outcome.congestion, 1.0);
    }

    #[test]
    fn test_upload_speed_stays_within_clamp() {
        let shaper = Shaper::new(NetworkConditions::default(), Some(42));

        for &size in &[1024 * 1024u64, 10 * 1024 * 1024, 25 * 1024 * 1024] {
            let plan = shaper.upload_plan(size);
            let outcome =
                shaper.upload_outcome(size, Duration::from_millis(50), plan);

            // The ±5% final fluctuation may leave the clamp window
            // slightly, but never by more than that fraction.
            assert!(outcome.speed_mbps >= 2.0 * 0.95);
            assert!(outcome.speed_mbps <= 12.0 * 1.05);
            assert!(outcome.duration_s > 0.0);
        }
    }
}
