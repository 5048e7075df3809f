//! Error taxonomy shared by every component.
//!
//! Each variant corresponds to one entry of the error taxonomy: components
//! return these as values, the Dispatcher attaches request metadata and
//! forwards them to the UI. Nothing in this crate panics on a malformed
//! request or a corrupt artifact.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy exposed to the Dispatcher and, ultimately, the UI.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The recorded artifact failed a structural check (bad magic, truncated
    /// stream, CRC mismatch, version below minimum). Fatal for the session.
    #[error("artifact corrupt at {path}: {reason}")]
    ArtifactCorrupt {
        /// Path to the offending artifact file.
        path: PathBuf,
        /// Human-readable description of the check that failed.
        reason: String,
    },

    /// A query addressed a tick, location, or event outside the recording.
    #[error("not in recording: {0}")]
    NotInRecording(String),

    /// The request was superseded or its deadline was exceeded.
    #[error("cancelled")]
    Cancelled,

    /// A request was malformed: bad regex, bad ignore pattern, unknown
    /// configuration option.
    #[error("invalid configuration: {0}")]
    ErrorConfig(String),

    /// A location could not be resolved to any step.
    #[error("location could not be resolved: {0}")]
    ErrorLocation(String),

    /// A tracepoint expression was rejected.
    #[error("tracepoint error: {0}")]
    ErrorTracepoint(String),

    /// An internal invariant was violated. Reported and logged; the core
    /// stays alive.
    #[error("internal error: {0}")]
    ErrorUnexpected(String),
}

impl CoreError {
    /// Whether this error is fatal for the whole session (§7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::ArtifactCorrupt { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::ErrorConfig(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::ErrorUnexpected(err.to_string())
    }
}
