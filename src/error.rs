// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the preservation engine.
//!
//! Errors are categorized by where they occur in the packaging/replication
//! pipeline and by what the caller is expected to do about them.
//!
//! # Error Categories
//!
//! | Error Type | Scope of damage | Description |
//! |------------|-----------------|-------------|
//! | `Configuration` | Whole call | Unknown collection, missing/invalid settings |
//! | `Write` | Single `pack` call | Container I/O failure, missing source file, length mismatch |
//! | `Replication` | Whole container | Fan-out exceeded tolerated pillar failures, retrieval failed, timeout |
//! | `Integrity` | Whole container | Checksum consensus violated (disagreement, pillar failure, zero responses) |
//! | `LocalFallback` | Single call | Destination collision on the local fallback archive |
//! | `Shutdown` | Single call | Client has been shut down; operation rejected immediately |
//! | `Internal` | n/a | Unexpected internal error |
//!
//! # Propagation Policy
//!
//! A `Write` error during `pack` aborts that call only; other collections'
//! active containers are unaffected. `Replication` and `Integrity` errors
//! during a sealed-container upload mark **all** member records of that
//! container failed: a container is uploaded and verified as one unit, and
//! there is no automatic retry. `Integrity` is never downgraded: any
//! checksum disagreement among pillars is fatal to that check.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for preservation operations.
pub type Result<T> = std::result::Result<T, PreservationError>;

/// Errors that can occur while packaging or replicating archival records.
#[derive(Error, Debug)]
pub enum PreservationError {
    /// Invalid or missing configuration.
    ///
    /// Raised for unknown collection ids and malformed settings.
    /// Fix the configuration and restart; never transient.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Container or source-file I/O failure.
    ///
    /// Aborts the single `pack` call it occurred in.
    #[error("Write error ({path}): {message}")]
    Write {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Replication fan-out failed.
    ///
    /// More pillars failed than the collection tolerates, a retrieval
    /// failed, or the operation timed out. Surfaced, not retried.
    #[error("Replication failure ({operation}): {message}")]
    Replication { operation: String, message: String },

    /// Checksum consensus violated.
    ///
    /// Pillars disagreed on a checksum, a pillar failed during a fixity
    /// check, or no pillar responded. Signals possible corruption and is
    /// never resolved by majority vote.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Destination collision or bad source on the local fallback archive.
    #[error("Local archive error: {0}")]
    LocalFallback(String),

    /// Client has been shut down.
    ///
    /// Operations issued after `shutdown()` fail immediately rather than hang.
    #[error("Client is shut down")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PreservationError {
    /// Create a `Write` error wrapping an I/O source.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a `Write` error without an I/O source.
    pub fn write_msg(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Replication` error for a named operation.
    pub fn replication(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Replication {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Stable label for this error's category, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Write { .. } => "write",
            Self::Replication { .. } => "replication",
            Self::Integrity(_) => "integrity",
            Self::LocalFallback(_) => "local_fallback",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this error fails the whole container (every member record)
    /// rather than just the call it occurred in.
    pub fn fails_container(&self) -> bool {
        matches!(self, Self::Replication { .. } | Self::Integrity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_formatting() {
        let err = PreservationError::write_msg("/tmp/c.warc", "content-length mismatch");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/c.warc"));
        assert!(msg.contains("content-length mismatch"));
        assert_eq!(err.kind(), "write");
    }

    #[test]
    fn test_write_error_wraps_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PreservationError::write("/data/missing", io);
        assert!(err.to_string().contains("no such file"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_replication_error_formatting() {
        let err = PreservationError::replication("upload", "2 of 3 pillars failed");
        assert!(err.to_string().contains("upload"));
        assert!(err.to_string().contains("2 of 3 pillars failed"));
        assert!(err.fails_container());
    }

    #[test]
    fn test_integrity_fails_container() {
        let err = PreservationError::Integrity("checksum disagreement".to_string());
        assert!(err.fails_container());
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn test_configuration_scoped_to_call() {
        let err = PreservationError::Configuration("unknown collection 'books'".to_string());
        assert!(!err.fails_container());
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_local_fallback_scoped_to_call() {
        let err = PreservationError::LocalFallback("destination exists".to_string());
        assert!(!err.fails_container());
        assert_eq!(err.kind(), "local_fallback");
    }

    #[test]
    fn test_shutdown_display() {
        let err = PreservationError::Shutdown;
        assert_eq!(err.to_string(), "Client is shut down");
        assert_eq!(err.kind(), "shutdown");
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let errors = [
            PreservationError::Configuration(String::new()),
            PreservationError::write_msg("p", "m"),
            PreservationError::replication("op", "m"),
            PreservationError::Integrity(String::new()),
            PreservationError::LocalFallback(String::new()),
            PreservationError::Shutdown,
            PreservationError::Internal(String::new()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }
}
