//! One check or sync run over a subscribed repository.
//!
//! The manifest is fetched first. When its ETag is unchanged the run ends
//! without touching any item. Otherwise every item is processed in its own
//! task, at most `max_concurrent_fetches` at a time, and all tasks are
//! joined before the repository record is written back. Item failures are
//! collected, never propagated to siblings.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use waymark_sync_config::SubscriptionStore;
use waymark_sync_library::{PresetLibrary, WaymarkPreset};

use super::error::{Result, SyncError};
use super::fetch::{Fetched, Fetcher};
use super::manifest::Manifest;
use super::progress::ProgressHandle;

/// The process-wide preset library. Every library access goes through this
/// one lock, whichever job or item it comes from.
pub type SharedLibrary = Arc<Mutex<dyn PresetLibrary>>;

/// What happened to one manifest item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Present locally and unchanged remotely
    NoUpdate,
    /// Present locally, changed remotely, not applied
    HasUpdate,
    /// Not in the library and not applied
    MissingLocally,
    /// Replaced the existing entry at `index`
    Updated { index: usize },
    /// Imported as a new entry at `index`
    Added { index: usize },
    Errored(String),
}

impl ItemStatus {
    /// Whether the item differs from the library (pending or applied).
    pub fn is_change(&self) -> bool {
        !matches!(self, ItemStatus::NoUpdate | ItemStatus::Errored(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ItemStatus::Errored(_))
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::NoUpdate => write!(f, "no changes"),
            ItemStatus::HasUpdate => write!(f, "has update"),
            ItemStatus::MissingLocally => write!(f, "missing locally"),
            ItemStatus::Updated { index } => write!(f, "updated (#{index})"),
            ItemStatus::Added { index } => write!(f, "added (#{index})"),
            ItemStatus::Errored(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub name: String,
    pub url: String,
    pub status: ItemStatus,
}

/// Result of a completed (possibly degraded) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub repo_url: String,
    pub apply: bool,
    pub manifest_changed: bool,
    /// Per-item results in manifest order
    pub items: Vec<ItemOutcome>,
    /// Final value written to the repository record
    pub has_updates: bool,
    /// At least one item failed
    pub errored: bool,
}

impl RunOutcome {
    /// Number of items imported into the library by this run.
    pub fn imported(&self) -> usize {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.status,
                    ItemStatus::Updated { .. } | ItemStatus::Added { .. }
                )
            })
            .count()
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| i.status.is_error())
    }
}

/// Runs checks and syncs against the shared store and library.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<SubscriptionStore>,
    library: SharedLibrary,
    fetcher: Fetcher,
}

impl SyncEngine {
    pub fn new(store: Arc<SubscriptionStore>, library: SharedLibrary, fetcher: Fetcher) -> Self {
        Self {
            store,
            library,
            fetcher,
        }
    }

    /// Check (`apply == false`) or sync (`apply == true`) one repository.
    ///
    /// Manifest failures and cancellation return `Err` and leave the
    /// repository's `has_updates` and last-check time untouched. Item
    /// failures produce a degraded `RunOutcome` with `errored` set.
    pub async fn run_update(
        &self,
        repo_url: &str,
        apply: bool,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let repo = self
            .store
            .repo(repo_url)
            .ok_or_else(|| SyncError::NotSubscribed {
                url: repo_url.to_string(),
            })?;
        let settings = self.store.settings();
        let commit_manifest = apply || settings.commit_manifest_on_check;
        crate::debug_info!(
            "SUBSCRIPTION",
            "{} '{}' ({})",
            if apply { "Syncing" } else { "Checking" },
            repo.name,
            repo_url
        );

        let manifest = progress
            .loading(
                "Fetching manifest",
                |m: &Fetched<Manifest>| {
                    if m.changed {
                        format!("changed, {} presets", m.value.waymarks.len())
                    } else {
                        "no changes".to_string()
                    }
                },
                self.fetcher.fetch_manifest(repo_url, cancel),
            )
            .await?;

        if !manifest.changed {
            let outcome = RunOutcome {
                repo_url: repo_url.to_string(),
                apply,
                manifest_changed: false,
                items: Vec::new(),
                has_updates: false,
                errored: false,
            };
            self.finish(&outcome, &manifest, commit_manifest)?;
            progress.finish("up to date");
            return Ok(outcome);
        }

        // Remember the item list so unsubscribing can drop every token this
        // run commits. A repository removed meanwhile is not processed.
        let item_urls = manifest.value.item_urls();
        if !self
            .store
            .update_repo(repo_url, |repo| repo.item_urls = item_urls)
        {
            return Err(SyncError::NotSubscribed {
                url: repo_url.to_string(),
            });
        }

        let items_node = progress.child(format!(
            "Checking {} presets",
            manifest.value.waymarks.len()
        ));
        let items = self
            .process_items(&manifest.value, &repo.name_prefix(), apply, &items_node, cancel)
            .await;

        if cancel.is_cancelled() {
            items_node.fail(&"cancelled");
            // Keep whatever tokens the finished items committed
            self.store.save()?;
            log::info!("Sync of {} cancelled", repo_url);
            return Err(SyncError::Cancelled {
                url: repo_url.to_string(),
            });
        }

        let errored = items.iter().any(|i| i.status.is_error());
        let any_changed = items.iter().any(|i| i.status.is_change());
        let outcome = RunOutcome {
            repo_url: repo_url.to_string(),
            apply,
            manifest_changed: true,
            has_updates: !(apply && any_changed && !errored),
            errored,
            items,
        };

        if errored {
            let failed = outcome.failed_items().count();
            items_node.fail(&format!("{failed} of {} failed", outcome.items.len()));
        } else {
            items_node.finish(format!("{} processed", outcome.items.len()));
        }

        // A degraded run leaves the manifest detectable as changed
        self.finish(&outcome, &manifest, commit_manifest && !errored)?;
        progress.finish(match (apply, outcome.has_updates) {
            (true, false) => format!("{} imported", outcome.imported()),
            (_, true) => "updates available".to_string(),
            (false, false) => "up to date".to_string(),
        });
        Ok(outcome)
    }

    async fn process_items(
        &self,
        manifest: &Manifest,
        prefix: &str,
        apply: bool,
        progress: &ProgressHandle,
        cancel: &CancellationToken,
    ) -> Vec<ItemOutcome> {
        let limit = Arc::new(Semaphore::new(
            self.store.settings().max_concurrent_fetches.max(1),
        ));
        let mut tasks = Vec::with_capacity(manifest.waymarks.len());
        let mut spawned = Vec::with_capacity(manifest.waymarks.len());

        for item in &manifest.waymarks {
            // Waiting here keeps unstarted items from spawning after cancel
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = ItemJob {
                name: item.name.clone(),
                url: item.location().to_string(),
                prefix: prefix.to_string(),
                apply,
                fetcher: self.fetcher.clone(),
                library: Arc::clone(&self.library),
                progress: progress.child(format!("Checking {}", item.name)),
                cancel: cancel.clone(),
            };
            spawned.push((job.name.clone(), job.url.clone()));
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                job.run().await
            }));
        }

        join_all(tasks)
            .await
            .into_iter()
            .zip(spawned)
            .map(|(joined, (name, url))| {
                joined.unwrap_or_else(|e| {
                    log::error!("Task for preset '{}' ended abnormally: {}", name, e);
                    ItemOutcome {
                        name,
                        url,
                        status: ItemStatus::Errored(e.to_string()),
                    }
                })
            })
            .collect()
    }

    /// Stamp and persist the repository record after a non-cancelled run.
    fn finish(
        &self,
        outcome: &RunOutcome,
        manifest: &Fetched<Manifest>,
        commit_manifest: bool,
    ) -> Result<()> {
        let commit_manifest = commit_manifest && manifest.etag.is_some();
        let now = Utc::now();
        let found = self.store.update_repo(&outcome.repo_url, |repo| {
            repo.has_updates = outcome.has_updates;
            repo.last_update_check = Some(now);
            if commit_manifest {
                repo.last_known_manifest_etag = manifest.etag.clone();
            }
        });
        if !found {
            // An unsubscribed repository must not get its token back
            log::warn!(
                "{} was unsubscribed during its run; result not recorded",
                outcome.repo_url
            );
        } else if commit_manifest {
            self.fetcher.commit(manifest);
        }
        self.store.save()?;

        crate::debug_info!(
            "SUBSCRIPTION",
            "Run for {} finished: has_updates={}, errored={}, imported={}",
            outcome.repo_url,
            outcome.has_updates,
            outcome.errored,
            outcome.imported()
        );
        Ok(())
    }
}

/// Everything one item task needs, owned so it can be spawned.
struct ItemJob {
    name: String,
    url: String,
    prefix: String,
    apply: bool,
    fetcher: Fetcher,
    library: SharedLibrary,
    progress: ProgressHandle,
    cancel: CancellationToken,
}

impl ItemJob {
    async fn run(self) -> ItemOutcome {
        let status = match self.progress.catching(self.process()).await {
            Ok(status) => {
                self.progress.finish(status.to_string());
                status
            }
            Err(e) => {
                if !e.is_cancelled() {
                    log::error!("Preset '{}' from {} failed: {}", self.name, self.url, e);
                }
                ItemStatus::Errored(e.to_string())
            }
        };
        ItemOutcome {
            name: self.name,
            url: self.url,
            status,
        }
    }

    async fn process(&self) -> Result<ItemStatus> {
        let fetched = self.fetcher.fetch_item(&self.url, &self.cancel).await?;

        let mut preset =
            WaymarkPreset::from_json(&fetched.value).map_err(|e| SyncError::PayloadFormat {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        preset.name = self.name.clone();

        let status = {
            let mut library = self.library.lock().await;
            match (
                library.identity_index_of(&preset),
                fetched.changed,
                self.apply,
            ) {
                (Some(_), false, _) => ItemStatus::NoUpdate,
                (Some(_), true, false) => ItemStatus::HasUpdate,
                (None, _, false) => ItemStatus::MissingLocally,
                (Some(_), true, true) => ItemStatus::Updated {
                    index: self.import(&mut *library, &preset)?,
                },
                (None, _, true) => ItemStatus::Added {
                    index: self.import(&mut *library, &preset)?,
                },
            }
        };

        // Only a sync that handled the item may mark it as seen
        if self.apply {
            self.fetcher.commit(&fetched);
        }
        crate::debug_log!("SUBSCRIPTION", "{}: {}", self.name, status);
        Ok(status)
    }

    fn import(&self, library: &mut dyn PresetLibrary, preset: &WaymarkPreset) -> Result<usize> {
        crate::debug_trace!("SUBSCRIPTION", "Importing {}{}", self.prefix, preset.name);
        library
            .import_preset(preset, &self.prefix)
            .map_err(|source| SyncError::ImportFailure {
                name: self.name.clone(),
                source,
            })
    }
}
