//! Error types for blockvol
//!
//! Provides a unified error type for all volume operations.

use thiserror::Error;

/// Result type alias using VolumeError
pub type Result<T> = std::result::Result<T, VolumeError>;

/// Unified error type for volume operations
#[derive(Debug, Error)]
pub enum VolumeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Lower-level failure from the storage medium, surfaced as-is.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Contract Errors
    // -------------------------------------------------------------------------
    #[error("Block not found: {hash}")]
    NotFound { hash: String },

    #[error("Volume {volume} is read-only")]
    ReadOnly { volume: String },

    /// Stored bytes differ from the caller's bytes. Collision and
    /// corruption are not distinguished at this layer.
    #[error("Content mismatch for block {hash}")]
    Mismatch { hash: String },

    /// Put refused because different content is already stored under the hash.
    #[error("Collision: different content already stored under {hash}")]
    Collision { hash: String },

    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Block size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed index line: {0}")]
    IndexFormat(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VolumeError {
    pub(crate) fn not_found(hash: &str) -> Self {
        Self::NotFound {
            hash: hash.to_string(),
        }
    }

    pub(crate) fn read_only(volume: impl std::fmt::Display) -> Self {
        Self::ReadOnly {
            volume: volume.to_string(),
        }
    }

    pub(crate) fn mismatch(hash: &str) -> Self {
        Self::Mismatch {
            hash: hash.to_string(),
        }
    }

    /// True for `NotFound`, including an I/O `NotFound` from the medium.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}
