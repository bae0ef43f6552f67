//! Configuration system for waymark-sync.
//!
//! This crate owns everything the sync core persists between runs:
//!
//! - `Config`: the YAML document on disk (subscriptions, ETags, sync settings)
//! - `SubscriptionRepo`: one subscribed remote preset repository
//! - `SubscriptionStore`: the runtime, concurrently shared view of the config
//!   (caching-token store + subscription collection) with a durable `save`

pub mod config;
pub mod error;
pub mod store;
pub mod subscription;

pub use config::{Config, SyncSettings};
pub use error::{ConfigError, Result};
pub use store::SubscriptionStore;
pub use subscription::SubscriptionRepo;
