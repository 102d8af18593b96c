//! Error types for overlay-core operations.
//!
//! Backend failures are non-fatal to an activation: the pipeline reports or
//! defaults them branch by branch. Only surface creation and readiness abort
//! a run.

use std::path::PathBuf;

/// All errors that can occur in overlay-core operations.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    // ─────────────────────────────────────────────────────────────────────
    // Activation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed activation input: {0}")]
    Parse(String),

    // ─────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Credential token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("Session start failed: {0}")]
    SessionStartFailed(String),

    #[error("Resume fetch failed: {id}: {details}")]
    ResumeFetchFailed { id: String, details: String },

    #[error("Session list failed: {0}")]
    SessionListFailed(String),

    // ─────────────────────────────────────────────────────────────────────
    // Surface Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Overlay surface could not be created: {0}")]
    SurfaceCreationFailed(String),

    #[error("Overlay surface did not become ready within {0}s")]
    SurfaceNotReady(u64),

    #[error("Overlay surface is closed or superseded")]
    SurfaceClosed,

    #[error("Overlay surface operation failed: {op}: {details}")]
    Surface { op: &'static str, details: String },

    #[error("Invalid overlay geometry: {0}")]
    InvalidGeometry(String),

    // ─────────────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Instance lock error: {0}")]
    InstanceLock(String),

    #[error("Configuration malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl OverlayError {
    pub fn surface(op: &'static str, details: impl Into<String>) -> Self {
        OverlayError::Surface {
            op,
            details: details.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OverlayError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using OverlayError.
pub type Result<T> = std::result::Result<T, OverlayError>;

// Tauri command boundaries speak String.
impl From<OverlayError> for String {
    fn from(err: OverlayError) -> String {
        err.to_string()
    }
}
