//! Crate-level error types.
//!
//! Structural parse errors live in [`crate::pe::PeError`] and attach to the
//! image's validity state rather than propagating; this module covers the
//! errors a library consumer can actually receive.

use thiserror::Error;

use crate::pe::PeError;

/// Main error type for pescope operations.
#[derive(Debug, Error)]
pub enum PescopeError {
    /// Structural PE parse error, surfaced through the image validity gate.
    #[error("PE parse error: {0}")]
    Parse(#[from] PeError),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A plugin could not be registered with the pipeline.
    #[error("plugin {id:?} rejected: {reason}")]
    PluginRejected { id: String, reason: String },

    /// A plugin failed internally; isolated at the pipeline boundary.
    #[error("plugin {id:?} fault: {message}")]
    PluginFault { id: String, message: String },

    /// Signature rule set could not be loaded or parsed.
    #[error("signature rules error: {0}")]
    Rules(String),
}

/// Result type alias for pescope operations.
pub type Result<T> = std::result::Result<T, PescopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PescopeError::PluginRejected {
            id: "resources".to_string(),
            reason: "unsupported API version 99".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "plugin \"resources\" rejected: unsupported API version 99"
        );

        let err = PescopeError::Rules("missing file".to_string());
        assert_eq!(err.to_string(), "signature rules error: missing file");
    }

    #[test]
    fn test_parse_error_wraps() {
        let err: PescopeError = PeError::BadDosMagic.into();
        assert!(err.to_string().contains("DOS"));
    }
}
