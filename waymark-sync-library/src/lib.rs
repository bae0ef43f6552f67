//! Local waymark preset library for waymark-sync.
//!
//! - [`preset`]: `WaymarkPreset` payload type, JSON decoding and `PresetIdentity`
//! - [`library`]: the `PresetLibrary` collaborator trait and the JSON-file
//!   backed `PresetStore`

pub mod error;
pub mod library;
pub mod preset;

pub use error::{LibraryError, Result};
pub use library::{PresetLibrary, PresetStore};
pub use preset::{PresetIdentity, Waymark, WaymarkPreset};
