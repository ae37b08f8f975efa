//! The three samplers and the engine that sequences them.
//!
//! Each sampler drives the timed transfer primitive in a strictly
//! sequential loop, emits every raw sample as a progress event, and
//! reduces its samples to one [`crate::results::PhaseResult`]. The
//! [`TestEngine`] runs ping, download, and upload in that order; phases
//! never overlap so bandwidth measurements stay uncontended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod download;
pub mod engine;
pub mod latency;
pub mod upload;

pub use download::DownloadConfig;
pub use engine::{TestConfig, TestEngine};
pub use latency::LatencyConfig;
pub use upload::{PayloadTier, UploadConfig};

use crate::errors::{MeasureError, Result};

/// Cheap cloneable cancellation flag.
///
/// The engine checks the token at every suspension point. In-flight
/// transfers are not force-aborted; a transfer that completes after
/// cancellation no longer influences any state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run holding this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Error out if cancellation has been requested.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MeasureError::aborted("run cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_observed_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(token.checkpoint().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.checkpoint().is_err());
    }
}
