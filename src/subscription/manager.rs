//! Caller-facing subscription operations.
//!
//! All job-starting calls return immediately with a [`JobHandle`]; progress
//! is polled with [`SubscriptionManager::progress`].

use std::sync::Arc;

use tokio::runtime::Handle;
use waymark_sync_config::{SubscriptionRepo, SubscriptionStore};

use super::engine::{RunOutcome, SharedLibrary, SyncEngine};
use super::error::{Result, SyncError};
use super::fetch::{Fetched, Fetcher};
use super::manifest::Manifest;
use super::progress::ProgressNode;
use super::scheduler::{JobHandle, JobScheduler};
use crate::http::{Transport, UreqTransport, validate_repo_url};

pub struct SubscriptionManager {
    store: Arc<SubscriptionStore>,
    library: SharedLibrary,
    fetcher: Fetcher,
    engine: SyncEngine,
    scheduler: JobScheduler,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<SubscriptionStore>,
        library: SharedLibrary,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Self {
        let fetcher = Fetcher::new(transport, Arc::clone(&store));
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&library),
            fetcher.clone(),
        );
        let scheduler = JobScheduler::new(runtime, store.settings().serialize_jobs);
        Self {
            store,
            library,
            fetcher,
            engine,
            scheduler,
        }
    }

    /// Manager backed by the network transport configured from the store's
    /// sync settings.
    pub fn with_http(store: Arc<SubscriptionStore>, library: SharedLibrary, runtime: Handle) -> Self {
        let transport = Arc::new(UreqTransport::new(store.settings()));
        Self::new(store, library, transport, runtime)
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn library(&self) -> &SharedLibrary {
        &self.library
    }

    /// Subscribed repositories in display order.
    pub fn repos(&self) -> Vec<SubscriptionRepo> {
        self.store.repos()
    }

    /// Subscribe to the repository whose manifest lives at `url`.
    ///
    /// The URL is validated and checked for duplicates before any network
    /// I/O. The job fetches the manifest to learn the display name; it does
    /// not record the manifest's token, so the first check sees it as
    /// changed.
    pub fn subscribe(&self, url: &str) -> Result<JobHandle<SubscriptionRepo>> {
        validate_repo_url(url, self.store.settings().allow_http).map_err(|reason| {
            SyncError::InvalidUrl {
                url: url.to_string(),
                reason,
            }
        })?;
        if self.store.contains_repo(url) {
            return Err(SyncError::DuplicateSubscription {
                url: url.to_string(),
            });
        }

        let store = Arc::clone(&self.store);
        let fetcher = self.fetcher.clone();
        let repo_url = url.to_string();
        self.scheduler
            .spawn(url, format!("Subscribe to {url}"), move |progress, cancel| async move {
                let manifest = progress
                    .loading(
                        "Fetching manifest",
                        |m: &Fetched<Manifest>| {
                            format!("'{}', {} presets", m.value.name, m.value.waymarks.len())
                        },
                        fetcher.fetch_manifest(&repo_url, &cancel),
                    )
                    .await?;

                let mut repo = SubscriptionRepo::new(manifest.value.name.clone(), repo_url.clone());
                repo.item_urls = manifest.value.item_urls();
                if !store.add_repo(repo) {
                    return Err(SyncError::DuplicateSubscription { url: repo_url });
                }
                store.save()?;
                let repo = store
                    .repo(&repo_url)
                    .ok_or_else(|| SyncError::NotSubscribed { url: repo_url.clone() })?;

                log::info!("Subscribed to '{}' ({})", repo.name, repo_url);
                progress.finish(format!("subscribed as {}", repo.name_prefix()));
                Ok(repo)
            })
            .ok_or_else(|| SyncError::AlreadyRunning {
                url: url.to_string(),
            })
    }

    /// Remove a subscription, cancelling any job running for it.
    ///
    /// The running job is awaited before anything is cleaned up, so it cannot
    /// import presets or record tokens afterwards. The tokens of the manifest
    /// and of its items are dropped. With `delete_presets`, every library
    /// entry whose name contains the repository's `[name]` tag is deleted as
    /// well. Returns how many presets were deleted.
    pub async fn unsubscribe(&self, url: &str, delete_presets: bool) -> Result<usize> {
        let repo = self
            .store
            .remove_repo(url)
            .ok_or_else(|| SyncError::NotSubscribed {
                url: url.to_string(),
            })?;
        self.scheduler.cancel_and_wait(url).await;
        let forgotten = self.store.forget_tokens(&repo);
        crate::debug_log!("SUBSCRIPTION", "Dropped {} tokens for {}", forgotten, url);

        let deleted = if delete_presets {
            let tag = repo.name_prefix();
            let mut library = self.library.lock().await;
            library.delete_tagged(&tag)
        } else {
            0
        };
        self.store.save()?;

        log::info!(
            "Unsubscribed from '{}' ({}), {} presets deleted",
            repo.name,
            url,
            deleted
        );
        Ok(deleted)
    }

    /// Start a check-only run unless a job for `url` is already running, in
    /// which case this returns `Ok(None)` and starts nothing.
    pub fn schedule_check(&self, url: &str) -> Result<Option<JobHandle<RunOutcome>>> {
        self.ensure_subscribed(url)?;
        Ok(self.spawn_run(url, false))
    }

    /// Start an applying run. Fails with `AlreadyRunning` if a job for
    /// `url` is in flight.
    pub fn sync(&self, url: &str) -> Result<JobHandle<RunOutcome>> {
        self.ensure_subscribed(url)?;
        self.spawn_run(url, true)
            .ok_or_else(|| SyncError::AlreadyRunning {
                url: url.to_string(),
            })
    }

    /// Schedule a check for every subscription not already being worked on.
    pub fn check_all(&self) -> Vec<JobHandle<RunOutcome>> {
        self.store
            .repos()
            .iter()
            .filter_map(|repo| self.spawn_run(&repo.repo_url, false))
            .collect()
    }

    pub fn progress(&self, url: &str) -> Option<ProgressNode> {
        self.scheduler.progress(url)
    }

    pub fn is_running(&self, url: &str) -> bool {
        self.scheduler.is_running(url)
    }

    pub fn cancel(&self, url: &str) -> bool {
        self.scheduler.cancel(url)
    }

    fn ensure_subscribed(&self, url: &str) -> Result<()> {
        if self.store.contains_repo(url) {
            Ok(())
        } else {
            Err(SyncError::NotSubscribed {
                url: url.to_string(),
            })
        }
    }

    fn spawn_run(&self, url: &str, apply: bool) -> Option<JobHandle<RunOutcome>> {
        let name = self
            .store
            .repo(url)
            .map(|r| r.name)
            .unwrap_or_else(|| url.to_string());
        let label = format!("{} {}", if apply { "Sync" } else { "Check" }, name);
        let engine = self.engine.clone();
        let repo_url = url.to_string();
        self.scheduler.spawn(url, label, move |progress, cancel| async move {
            engine.run_update(&repo_url, apply, &progress, &cancel).await
        })
    }
}
