//! Typed error variants for the preset library.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Debug, Error)]
pub enum LibraryError {
    /// The preset payload is not a valid waymark preset document.
    #[error("Invalid preset payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// The preset decoded but cannot be stored.
    #[error("Preset '{name}' rejected: {reason}")]
    Invalid { name: String, reason: String },

    /// The library file could not be read or written.
    #[error("Preset library I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The library file exists but is not a valid library document.
    #[error("Preset library at '{}' is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
