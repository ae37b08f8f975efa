//! Progress events emitted by the test engine.
//!
//! Consumers subscribe to a [`ProgressSink`] and receive every event of a
//! run over an unbounded channel; the engine never blocks on a slow or
//! dropped subscriber. The overall completion percentage is tracked by a
//! [`ProgressGauge`], which only ever moves forward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Test phases during a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    /// No run is in progress.
    Idle,
    /// Running latency probes.
    Ping,
    /// Running download transfers.
    Download,
    /// Running upload transfers.
    Upload,
    /// The run finished successfully.
    Complete,
}

/// Direction of a bandwidth measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthDirection {
    /// Download test.
    Download,
    /// Upload test.
    Upload,
}

/// Progress events emitted during test execution.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run has entered a new phase.
    PhaseChange(TestPhase),
    /// A latency probe completed.
    LatencySample {
        /// Measured round-trip latency in milliseconds.
        latency_ms: f64,
        /// Server-reported jitter in milliseconds.
        jitter_ms: f64,
        /// Probe number (1-indexed).
        current: usize,
        /// Total number of probes.
        total: usize,
    },
    /// A bandwidth transfer completed.
    SpeedSample {
        /// Direction of the transfer.
        direction: BandwidthDirection,
        /// Measured speed in Mbps.
        speed_mbps: f64,
        /// Transfer number (1-indexed).
        current: usize,
        /// Total number of transfers.
        total: usize,
    },
    /// The overall completion percentage advanced.
    OverallProgress(f64),
    /// A phase finished with all its samples collected.
    PhaseComplete(TestPhase),
}

/// Fan-out channel for progress events.
///
/// Each subscriber gets its own unbounded receiver; senders whose
/// receiver has been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct ProgressSink {
    senders: Mutex<Vec<UnboundedSender<ProgressEvent>>>,
}

impl ProgressSink {
    /// Create a sink with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: ProgressEvent) {
        let mut senders =
            self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Monotone overall-progress scalar in the range 0..=100.
///
/// Phase transitions raise the floor and per-sample updates advance by a
/// fixed step up to the phase's cap; no operation can move the value
/// backwards.
#[derive(Debug)]
pub struct ProgressGauge {
    bits: AtomicU64,
}

impl ProgressGauge {
    /// Start a gauge at zero.
    pub fn new() -> Self {
        Self { bits: AtomicU64::new(0f64.to_bits()) }
    }

    /// Current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Raise the gauge to at least `floor`; returns the resulting value.
    pub fn set_floor(&self, floor: f64) -> f64 {
        self.update(|current| current.max(floor))
    }

    /// Advance by `step`, saturating at `cap` but never moving backwards
    /// past an already-higher value; returns the resulting value.
    pub fn advance(&self, step: f64, cap: f64) -> f64 {
        self.update(|current| (current + step).min(cap).max(current))
    }

    fn update(&self, f: impl Fn(f64) -> f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current));
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for ProgressGauge {
    fn default() -> Self {
        Self::new()
    }
}
