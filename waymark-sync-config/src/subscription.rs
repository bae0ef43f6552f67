//! Subscribed repository record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote waymark preset repository the user subscribed to.
///
/// Identified by `repo_url` (the manifest URL). Only the sync engine mutates
/// `has_updates`, `last_update_check` and `last_known_manifest_etag`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRepo {
    /// Display name taken from the manifest at subscribe time
    pub name: String,

    /// Manifest URL, unique within the subscription set
    pub repo_url: String,

    /// Whether the last run found (or could not rule out) pending changes
    #[serde(default = "default_has_updates")]
    pub has_updates: bool,

    /// When the last completed check or sync finished
    #[serde(default)]
    pub last_update_check: Option<DateTime<Utc>>,

    /// ETag of the manifest as of the last committed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_manifest_etag: Option<String>,

    /// Item URLs listed by the last fetched manifest, so their tokens can be
    /// dropped on unsubscribe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_urls: Vec<String>,

    /// Position in the subscription list
    #[serde(default)]
    pub order: usize,
}

fn default_has_updates() -> bool {
    true
}

impl SubscriptionRepo {
    /// Create a freshly subscribed repository.
    ///
    /// New repositories are flagged as having updates and have never been
    /// checked, so the first sync imports everything.
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_url: repo_url.into(),
            has_updates: true,
            last_update_check: None,
            last_known_manifest_etag: None,
            item_urls: Vec::new(),
            order: 0,
        }
    }

    /// The bracketed tag prefixed to every preset imported from this repository.
    pub fn name_prefix(&self) -> String {
        format!("[{}]", self.name)
    }

    /// Human-readable last-check time for listings.
    pub fn last_check_display(&self) -> String {
        match self.last_update_check {
            Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            None => "never".to_string(),
        }
    }
}
