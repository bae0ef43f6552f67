//! Remote preset repository subscriptions.
//!
//! A repository publishes a YAML manifest listing preset documents. Checks
//! and syncs use each resource's ETag to skip unchanged work: an unchanged
//! manifest means no item is fetched at all, and an unchanged item with a
//! matching library entry is never re-imported.
//!
//! - [`manifest`]: the manifest document and item URL resolution
//! - [`fetch`]: GET plus ETag change detection, with deferred token commits
//! - [`engine`]: one check/sync run with bounded parallel item processing
//! - [`scheduler`]: one job per repository URL, optional global job slot
//! - [`progress`]: the per-job diagnostics tree
//! - [`manager`]: the caller-facing API tying these together

pub mod engine;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod manifest;
pub mod progress;
pub mod scheduler;

pub use engine::{ItemOutcome, ItemStatus, RunOutcome, SharedLibrary, SyncEngine};
pub use error::{Result, SyncError};
pub use fetch::{Fetched, Fetcher};
pub use manager::SubscriptionManager;
pub use manifest::{Manifest, ManifestItem};
pub use progress::{NodeStatus, ProgressHandle, ProgressNode, ProgressTree};
pub use scheduler::{JobHandle, JobScheduler, WAITING_FOR_JOBS};
