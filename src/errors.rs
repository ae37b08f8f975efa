//! Error types for the measurement core.
//!
//! This module provides user-friendly error types that wrap underlying
//! errors with clear, actionable messages.

use std::error::Error;
use std::fmt;

/// Exit codes for the application.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Transfer error (connection failed, non-success status, abort).
    pub const TRANSFER_ERROR: i32 = 1;
    /// Test payload could not be fetched.
    pub const PAYLOAD_ERROR: i32 = 2;
    /// Configuration error (invalid arguments, bad server URL).
    pub const CONFIG_ERROR: i32 = 3;
    /// Measurement produced no usable samples.
    pub const MEASUREMENT_ERROR: i32 = 4;
    /// History storage failure.
    pub const STORAGE_ERROR: i32 = 5;
    /// Run was cancelled before completion.
    pub const ABORTED: i32 = 6;
    /// Unknown/unexpected error.
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Categories of errors that can occur during a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A timed transfer did not complete (transport failure, abort, or
    /// non-success response).
    Transfer,
    /// A static test payload was unavailable.
    PayloadFetch,
    /// Cancellation was observed before the run completed.
    Aborted,
    /// No valid samples survived to produce a result.
    Measurement,
    /// History could not be loaded, saved, or cleared.
    Storage,
    /// Invalid configuration or arguments.
    Config,
    /// Unknown or unexpected errors.
    Unknown,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Transfer => exit_codes::TRANSFER_ERROR,
            ErrorKind::PayloadFetch => exit_codes::PAYLOAD_ERROR,
            ErrorKind::Aborted => exit_codes::ABORTED,
            ErrorKind::Measurement => exit_codes::MEASUREMENT_ERROR,
            ErrorKind::Storage => exit_codes::STORAGE_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    /// Get a user-friendly description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Transfer => "Transfer error",
            ErrorKind::PayloadFetch => "Payload fetch error",
            ErrorKind::Aborted => "Test aborted",
            ErrorKind::Measurement => "Measurement error",
            ErrorKind::Storage => "Storage error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

/// A user-friendly error type for measurement operations.
#[derive(Debug)]
pub struct MeasureError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// User-friendly error message.
    pub message: String,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeasureError>;

impl MeasureError {
    /// Create a new MeasureError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Create a transfer error.
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transfer, message)
    }

    /// Create a payload fetch error.
    pub fn payload_fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadFetch, message)
    }

    /// Create a cancellation error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    /// Create a measurement error.
    pub fn measurement(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Measurement, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

impl fmt::Display for MeasureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref source) = self.source {
            write!(f, " ({})", source)?;
        }

        Ok(())
    }
}

impl Error for MeasureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_exit_codes() {
        assert_eq!(ErrorKind::Transfer.exit_code(), exit_codes::TRANSFER_ERROR);
        assert_eq!(
            ErrorKind::PayloadFetch.exit_code(),
            exit_codes::PAYLOAD_ERROR
        );
        assert_eq!(ErrorKind::Aborted.exit_code(), exit_codes::ABORTED);
        assert_eq!(ErrorKind::Config.exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(ErrorKind::Storage.exit_code(), exit_codes::STORAGE_ERROR);
    }

    #[test]
    fn test_measure_error_display() {
        let error = MeasureError::transfer("download request failed");

        let display = format!("{}", error);
        assert!(display.contains("Transfer error"));
        assert!(display.contains("download request failed"));
    }

    #[test]
    fn test_measure_error_source_chain() {
        let io = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        );
        let error = MeasureError::transfer("probe failed").with_source(io);

        assert!(error.source().is_some());
        assert!(format!("{}", error).contains("connection refused"));
    }
}
