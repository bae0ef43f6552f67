//! Errors surfaced by subscription operations and sync runs.

use thiserror::Error;
use waymark_sync_config::ConfigError;

use crate::http::TransportError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository URL was rejected before any network I/O.
    #[error("Invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Already subscribed to {url}")]
    DuplicateSubscription { url: String },

    #[error("Not subscribed to {url}")]
    NotSubscribed { url: String },

    /// A job for this repository is already in flight.
    #[error("A job for {url} is already running")]
    AlreadyRunning { url: String },

    #[error("Failed to fetch {url}: {source}")]
    NetworkFailure {
        url: String,
        #[source]
        source: TransportError,
    },

    /// The manifest body is not a valid manifest document.
    #[error("Invalid manifest at {url}: {message}")]
    ManifestFormat { url: String, message: String },

    /// An item body does not decode as a waymark preset.
    #[error("Invalid preset at {url}: {message}")]
    PayloadFormat { url: String, message: String },

    /// The local library refused or failed to store a preset.
    #[error("Failed to import '{name}': {source}")]
    ImportFailure {
        name: String,
        #[source]
        source: waymark_sync_library::LibraryError,
    },

    #[error("Job for {url} was cancelled")]
    Cancelled { url: String },

    /// A job task ended without producing a result (panic or abort).
    #[error("Job for {url} stopped unexpectedly: {message}")]
    JobFailed { url: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled { .. })
    }
}
