// Library exports for testing and potential library use
//
// # Mutex Usage Policy
//
//   - `tokio::sync::Mutex`:   held across `.await`: the preset library gate
//                               and the optional job slot.
//
//   - `parking_lot::Mutex`:   short synchronous sections only: the progress
//                               tree arena, config flushes, the debug logger.
//
// Per-URL shared state (ETags, subscriptions, running jobs, progress trees)
// lives in `DashMap`s instead of behind a global lock.

/// Application version (root crate version, for use by sub-crates).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[macro_use]
pub mod debug;

pub mod cli;
pub mod http;
pub mod subscription;

pub use waymark_sync_config as config;
pub use waymark_sync_library as library;
