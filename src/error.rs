//! Error types for the ingestion and detection pipeline.
//!
//! Each stage has its own error so callers can tell permanent input problems
//! (validation, compression) apart from transient faults (storage, network)
//! that are worth retrying.

use thiserror::Error;

/// Input rejected before any work is spent on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported format {mime}. Use: {allowed}")]
    UnsupportedType { mime: String, allowed: String },

    #[error("Empty file")]
    Empty,

    #[error("File too large ({size} bytes, max {max_mb}MB)")]
    TooLarge { size: u64, max_mb: u64 },
}

/// Decoding or re-encoding an accepted image failed.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Failed to load image for compression: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to compress image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Compression worker failed: {0}")]
    Worker(String),
}

/// Object storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata store failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored value in {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("location not found: {0}")]
    LocationNotFound(uuid::Uuid),

    #[error("location name must not be empty")]
    EmptyName,

    #[error("database lock poisoned")]
    Poisoned,
}

/// Failure of a single photo upload or of a whole batch.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("Upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to generate signed URL for uploaded photo")]
    Unsigned,

    #[error("Failed to save photo record: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("All uploads failed: {0}")]
    AllFailed(String),

    #[error("Location already has the maximum of {max} photos")]
    LocationFull { max: usize },
}

/// Remote analysis failure for one photo.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection request failed: {0}")]
    Request(String),

    #[error("Failed to parse detection response: {0}")]
    Parse(String),

    #[error("Failed to generate signed URL for photo {0}")]
    Unsigned(uuid::Uuid),

    #[error("Failed to load photo for detection: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to store detections: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Detection worker failed: {0}")]
    Worker(String),
}

/// Misuse of the analysis session (as opposed to a detector failure).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("photo {0} is not part of the current analysis")]
    UnknownPhoto(uuid::Uuid),

    #[error("photo {0} is not in error and cannot be retried")]
    NotRetryable(uuid::Uuid),
}
