//! Error types for gcs-zip

use std::io;

/// Result type for gcs-zip operations
pub type Result<T> = std::result::Result<T, GcsZipError>;

/// Errors that abort an archive run.
///
/// Every variant except `InvalidTarget` and `InvalidState` displays the raw
/// message reported by the storage library or the OS, so front ends can
/// print it unchanged.
#[derive(Debug, thiserror::Error)]
pub enum GcsZipError {
    /// I/O error while copying object bytes or writing the archive
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Storage client could not be built or authenticated
    #[error("{0}")]
    Client(String),
    /// Listing objects under the prefix failed
    #[error("{0}")]
    List(String),
    /// An object could not be opened for reading
    #[error("{0}")]
    Open(String),
    /// Target URI rejected by strict parsing
    #[error("invalid target {0:?}: expected gs://<bucket>/<prefix>")]
    InvalidTarget(String),
    /// Archive writer used out of order
    #[error("invalid archive state: {0}")]
    InvalidState(String),
}
