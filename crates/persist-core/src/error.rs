//! Error types shared by the orchestrator and its collaborators.

use thiserror::Error;

use crate::codec::ParseError;
use crate::persistence::{Feature, Operation};

/// Errors reported by storage backends (direct handles, app storage, drafts, export).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Errors dispatching a request to the background save channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Save channel closed")]
    Closed,

    #[error("Failed to post save request: {0}")]
    Post(String),
}

/// Errors while probing an optional host capability.
///
/// Probe failures never abort bootstrap; the feature is simply disabled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Capability probe failed: {0}")]
    Failed(String),
}

/// Errors returned at the orchestrator's operation boundary.
///
/// By the time one of these is returned the failure has already been logged
/// and, where the user needs to know, surfaced through `UiHost::alert`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistError {
    #[error("Operation {0} rejected: another load or save is in progress")]
    Busy(Operation),

    #[error("Persistence already initialized")]
    AlreadyInitialized,

    #[error("Write permission denied")]
    PermissionDenied,

    #[error("Backing file not found: {0}")]
    HandleNotFound(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to serialize document")]
    Serialization,

    #[error("Draft storage quota exceeded")]
    QuotaExceeded,

    #[error("Background save channel unavailable")]
    ChannelUnavailable,

    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(Feature),

    #[error("No direct file handle available")]
    NoDirectHandle,

    #[error("Nothing to export")]
    NothingToExport,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;
