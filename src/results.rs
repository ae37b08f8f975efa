//! Result data structures for a measurement run.
//!
//! A [`PhaseResult`] is the reduced output of one sampler; a [`TestResult`]
//! is the full outcome of one end-to-end run. Both are immutable once
//! produced. `TestResult` serializes for history persistence and the CLI's
//! JSON output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{MeasureError, Result};
use crate::identity::NetworkIdentity;

/// The measurement phase a reduced result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Round-trip latency probing.
    Ping,
    /// Download throughput sampling.
    Download,
    /// Upload throughput sampling.
    Upload,
}

/// Reduced output of one sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseResult {
    /// Which phase produced this result.
    pub kind: PhaseKind,
    /// The phase's primary metric: latency in milliseconds for ping,
    /// throughput in Mbps for download/upload.
    pub primary: f64,
    /// Secondary metric, currently only jitter (ms) for the ping phase.
    pub secondary: Option<f64>,
}

impl PhaseResult {
    /// Ping phase output: trimmed-mean latency plus jitter.
    pub fn ping(latency_ms: f64, jitter_ms: f64) -> Self {
        Self { kind: PhaseKind::Ping, primary: latency_ms, secondary: Some(jitter_ms) }
    }

    /// Download phase output: weighted-mean throughput.
    pub fn download(speed_mbps: f64) -> Self {
        Self { kind: PhaseKind::Download, primary: speed_mbps, secondary: None }
    }

    /// Upload phase output: median throughput.
    pub fn upload(speed_mbps: f64) -> Self {
        Self { kind: PhaseKind::Upload, primary: speed_mbps, secondary: None }
    }
}

/// The full outcome of one completed run.
///
/// All numeric fields are non-negative and finite; [`TestResult::new`]
/// enforces the invariant and the struct is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// When the run completed.
    pub date: DateTime<Utc>,
    /// ISP name reported by the network-identity collaborator.
    pub isp: String,
    /// Client IP address.
    pub ip: String,
    /// Label of the server the test ran against.
    pub server: String,
    /// Round-trip latency in milliseconds.
    pub ping: f64,
    /// Latency variability in milliseconds.
    pub jitter: f64,
    /// Download throughput in Mbps.
    pub download: f64,
    /// Upload throughput in Mbps.
    pub upload: f64,
}

impl TestResult {
    /// Assemble a result from the three phase outputs and the externally
    /// supplied identity fields.
    ///
    /// Fails with a measurement error if any metric is negative or
    /// non-finite.
    pub fn new(
        identity: NetworkIdentity,
        ping: f64,
        jitter: f64,
        download: f64,
        upload: f64,
    ) -> Result<Self> {
        for (name, value) in [
            ("ping", ping),
            ("jitter", jitter),
            ("download", download),
            ("upload", upload),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MeasureError::measurement(format!(
                    "{} is not a usable metric: {}",
                    name, value
                )));
            }
        }

        Ok(Self {
            date: Utc::now(),
            isp: identity.isp,
            ip: identity.ip,
            server: identity.server,
            ping,
            jitter,
            download,
            upload,
        })
    }
}
