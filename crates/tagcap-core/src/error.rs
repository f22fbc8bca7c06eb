//! Error types for the tagcap caption refinement engine.
//!
//! Per-image outcomes are ordinary `CaptionError` values inspected by the
//! controller and dispatcher to choose the next state transition; only
//! `TagcapError` crosses the library boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for tagcap operations.
#[derive(Error, Debug)]
pub enum TagcapError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Captioning and dispatch errors
    #[error("Caption error: {0}")]
    Caption(#[from] CaptionError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Per-image and service errors, organized by the decision they drive.
#[derive(Error, Debug)]
pub enum CaptionError {
    /// Timeout, 5xx, or malformed response; retried within the attempt's
    /// backoff loop
    #[error("Transient service error: {message}")]
    Transient {
        message: String,
        status_code: Option<u16>,
    },

    /// HTTP 429; extends the offending credential's cooldown instead of
    /// failing the attempt
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// The service explicitly declined to caption the image
    #[error("Service refused request: {message}")]
    Refused { message: String },

    /// Every credential left in the pool failed its health probe
    #[error("No usable credentials left in the pool")]
    ResourceExhausted,

    /// A credential never left cooldown within the acquire ceiling
    #[error("Timed out after {waited_ms}ms waiting for a credential")]
    ResourceTimeout { waited_ms: u64 },

    /// Tag file absent for an image; skipped with a warning, never retried
    #[error("Tag file not found for {path}")]
    MissingTags { path: PathBuf },

    /// An accepted caption already exists and refinement is disabled
    #[error("Caption already exists for {path}")]
    AlreadySatisfied { path: PathBuf },

    /// An attempt produced zero usable candidates
    #[error("No usable candidates were generated")]
    EmptyCandidates,

    /// The run-wide cancellation flag was raised
    #[error("Cancelled")]
    Cancelled,

    /// Image payload could not be decoded or re-encoded
    #[error("Image error for {path}: {message}")]
    Image { path: PathBuf, message: String },

    /// File read/write failed for a per-image artifact
    #[error("IO error for {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl CaptionError {
    /// Whether the error should go through the attempt's fixed-backoff loop.
    ///
    /// Rate limits are transient from the attempt's point of view: the
    /// credential is penalized and the next call rotates to another entry.
    /// Refusals, missing prerequisites, and pool exhaustion are not retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptionError::Transient { .. }
                | CaptionError::RateLimited { .. }
                | CaptionError::EmptyCandidates
        )
    }

    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptionError::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }
}

/// Convenience type alias for tagcap results.
pub type Result<T> = std::result::Result<T, TagcapError>;

/// Convenience type alias for per-image results.
pub type CaptionResult<T> = std::result::Result<T, CaptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_transient() {
        let err = CaptionError::Transient {
            message: "HTTP 503: unavailable".to_string(),
            status_code: Some(503),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let err = CaptionError::RateLimited {
            message: "quota exceeded".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_empty_candidates_escalates_to_transient() {
        assert!(CaptionError::EmptyCandidates.is_transient());
    }

    #[test]
    fn test_refused_not_transient() {
        let err = CaptionError::Refused {
            message: "blocked".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_tags_not_transient() {
        let err = CaptionError::MissingTags {
            path: PathBuf::from("a.png"),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_resource_exhausted_not_transient() {
        assert!(!CaptionError::ResourceExhausted.is_transient());
    }
}
