//! Persistence error handling
//!
//! Provides typed errors for state files with descriptive messages and
//! recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing persisted state
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Failed to create the state directory
    #[error("Failed to create state directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// State file exists but cannot be parsed
    #[error("Invalid state file '{path}': {details}")]
    InvalidFormat { path: PathBuf, details: String },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl PersistenceError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => PersistenceError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => PersistenceError::DiskFull {
                path,
                source: error,
            },
            _ => PersistenceError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            PersistenceError::DiskFull { .. } => Some("Free up disk space and try again."),
            PersistenceError::PermissionDenied { .. } => {
                Some("Check file and directory permissions of the data directory.")
            }
            PersistenceError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            PersistenceError::InvalidFormat { .. } => {
                Some("Move the damaged state file aside; the identity is re-created on next start.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}
