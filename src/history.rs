//! Bounded test history and its storage port.
//!
//! A [`TestHistory`] keeps the most recent results first, capped at
//! [`HISTORY_CAP`] entries. Persistence goes through the [`HistoryStore`]
//! port so the core stays testable without a real backend; the CLI uses
//! [`JsonFileStore`], tests use [`MemoryStore`].

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{MeasureError, Result};
use crate::results::TestResult;

/// Maximum number of retained results.
pub const HISTORY_CAP: usize = 100;

/// Ordered run history, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestHistory {
    /// Retained results, newest at index 0.
    pub tests: Vec<TestResult>,
    /// When the history last changed.
    #[serde(rename = "lastUpdate")]
    pub last_update: Option<DateTime<Utc>>,
}

impl TestHistory {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a completed result, truncate to the cap, and stamp the
    /// update time. No merging or deduplication is performed.
    pub fn record(&mut self, result: TestResult) {
        self.tests.insert(0, result);
        self.tests.truncate(HISTORY_CAP);
        self.last_update = Some(Utc::now());
    }
}

/// Storage port for the history blob.
pub trait HistoryStore {
    /// Load the stored history; an absent store yields an empty history.
    fn load(&self) -> Result<TestHistory>;

    /// Persist the full history, replacing whatever was stored.
    fn save(&self, history: &TestHistory) -> Result<()>;

    /// Erase the stored history.
    fn clear(&self) -> Result<()>;
}

/// JSON-file-backed store, the durable storage of the CLI.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store the history at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Result<TestHistory> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("no history at {}, starting empty", self.path.display());
                return Ok(TestHistory::new());
            }
            Err(error) => {
                return Err(MeasureError::storage(format!(
                    "could not read history from {}",
                    self.path.display()
                ))
                .with_source(error))
            }
        };

        serde_json::from_str(&raw).map_err(|error| {
            MeasureError::storage(format!(
                "history at {} is not valid JSON",
                self.path.display()
            ))
            .with_source(error)
        })
    }

    fn save(&self, history: &TestHistory) -> Result<()> {
        let json = serde_json::to_string_pretty(history).map_err(|error| {
            MeasureError::storage("could not serialize history")
                .with_source(error)
        })?;

        fs::write(&self.path, json).map_err(|error| {
            MeasureError::storage(format!(
                "could not write history to {}",
                self.path.display()
            ))
            .with_source(error)
        })
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(())
            }
            Err(error) => Err(MeasureError::storage(format!(
                "could not clear history at {}",
                self.path.display()
            ))
            .with_source(error)),
        }
    }
}

/// In-memory store for tests and embedding consumers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    history: Mutex<TestHistory>,
}

impl MemoryStore {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<TestHistory> {
        Ok(self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, history: &TestHistory) -> Result<()> {
        *self.history.lock().unwrap_or_else(PoisonError::into_inner) =
            history.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.history.lock().unwrap_or_else(PoisonError::into_inner) =
            TestHistory::new();
        Ok(())
    }
}
