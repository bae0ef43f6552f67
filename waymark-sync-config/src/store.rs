//! Runtime view of the configuration shared across sync jobs.
//!
//! The caching-token store and the subscription collection are keyed by
//! independent URLs, so both live in `DashMap`s and never need a global lock.
//! Only `save` serializes, and only against other saves.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::config::{Config, SyncSettings};
use crate::error::Result;
use crate::subscription::SubscriptionRepo;

/// Concurrently shared token store and subscription collection.
#[derive(Debug)]
pub struct SubscriptionStore {
    /// Config file backing this store (`None` keeps everything in memory)
    path: Option<PathBuf>,
    /// Last-seen ETag per resource URL
    etags: DashMap<String, String>,
    /// Subscribed repositories keyed by manifest URL
    repos: DashMap<String, SubscriptionRepo>,
    /// Next display order handed out by `add_repo`
    next_order: AtomicUsize,
    library_path: Option<PathBuf>,
    settings: SyncSettings,
    /// Serializes concurrent flushes to the config file
    flush_lock: Mutex<()>,
}

impl SubscriptionStore {
    /// Build a store from a loaded config, persisting back to `path`.
    pub fn from_config(config: Config, path: Option<PathBuf>) -> Self {
        let next_order = config
            .subscriptions
            .iter()
            .map(|r| r.order + 1)
            .max()
            .unwrap_or(0);

        let repos = DashMap::new();
        for repo in config.subscriptions {
            repos.insert(repo.repo_url.clone(), repo);
        }

        Self {
            path,
            etags: config.url_to_etags.into_iter().collect(),
            repos,
            next_order: AtomicUsize::new(next_order),
            library_path: config.library_path,
            settings: config.sync,
            flush_lock: Mutex::new(()),
        }
    }

    /// Load the config at `path` (defaults if missing) into a store.
    pub fn open(path: &Path) -> Result<Self> {
        let config = Config::load_from(path)?;
        Ok(Self::from_config(config, Some(path.to_path_buf())))
    }

    /// A store that is never written to disk.
    pub fn in_memory(settings: SyncSettings) -> Self {
        Self::from_config(
            Config {
                sync: settings,
                ..Config::default()
            },
            None,
        )
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Preset library location for this config.
    pub fn library_path(&self) -> PathBuf {
        match (&self.library_path, &self.path) {
            (Some(path), _) => path.clone(),
            (None, Some(config_path)) => Config::default().library_path_for(config_path),
            (None, None) => PathBuf::from("presets.json"),
        }
    }

    // ── Caching-token store ────────────────────────────────────────────

    /// Last committed ETag for `url`.
    pub fn etag(&self, url: &str) -> Option<String> {
        self.etags.get(url).map(|e| e.value().clone())
    }

    /// Record `etag` as the last-seen validator for `url`.
    pub fn set_etag(&self, url: &str, etag: &str) {
        self.etags.insert(url.to_string(), etag.to_string());
    }

    pub fn remove_etag(&self, url: &str) -> Option<String> {
        self.etags.remove(url).map(|(_, v)| v)
    }

    /// Drop the tokens of a removed repository: its manifest and every item
    /// URL it listed that no remaining subscription still lists. Returns how
    /// many tokens were removed.
    pub fn forget_tokens(&self, repo: &SubscriptionRepo) -> usize {
        let shared: HashSet<String> = self
            .repos
            .iter()
            .filter(|r| r.key() != &repo.repo_url)
            .flat_map(|r| r.value().item_urls.clone())
            .collect();
        std::iter::once(&repo.repo_url)
            .chain(repo.item_urls.iter().filter(|url| !shared.contains(*url)))
            .filter(|url| self.etags.remove(url.as_str()).is_some())
            .count()
    }

    // ── Subscription collection ────────────────────────────────────────

    pub fn contains_repo(&self, url: &str) -> bool {
        self.repos.contains_key(url)
    }

    /// Snapshot of one repository record.
    pub fn repo(&self, url: &str) -> Option<SubscriptionRepo> {
        self.repos.get(url).map(|r| r.value().clone())
    }

    /// Insert a new repository at the end of the list.
    ///
    /// Returns `false` without modifying anything when the URL is already
    /// subscribed.
    pub fn add_repo(&self, mut repo: SubscriptionRepo) -> bool {
        match self.repos.entry(repo.repo_url.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                repo.order = self.next_order.fetch_add(1, Ordering::SeqCst);
                slot.insert(repo);
                true
            }
        }
    }

    /// Mutate the record for `url` in place. Returns `false` if not subscribed.
    pub fn update_repo<F>(&self, url: &str, f: F) -> bool
    where
        F: FnOnce(&mut SubscriptionRepo),
    {
        match self.repos.get_mut(url) {
            Some(mut repo) => {
                f(repo.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn remove_repo(&self, url: &str) -> Option<SubscriptionRepo> {
        self.repos.remove(url).map(|(_, r)| r)
    }

    /// All repositories in display order.
    pub fn repos(&self) -> Vec<SubscriptionRepo> {
        let mut repos: Vec<SubscriptionRepo> =
            self.repos.iter().map(|r| r.value().clone()).collect();
        repos.sort_by_key(|r| r.order);
        repos
    }

    // ── Persistence ────────────────────────────────────────────────────

    /// Snapshot the store into a serializable config document.
    pub fn to_config(&self) -> Config {
        Config {
            subscriptions: self.repos(),
            url_to_etags: self
                .etags
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            library_path: self.library_path.clone(),
            sync: self.settings.clone(),
        }
    }

    /// Durably flush the current state. A no-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock();
        self.to_config().save_to(path)?;
        log::debug!("Saved subscription config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_etag_set_get_remove() {
        let store = SubscriptionStore::in_memory(SyncSettings::default());
        assert_eq!(store.etag("https://x/a.json"), None);

        store.set_etag("https://x/a.json", "\"v1\"");
        assert_eq!(store.etag("https://x/a.json").as_deref(), Some("\"v1\""));

        store.set_etag("https://x/a.json", "\"v2\"");
        assert_eq!(store.etag("https://x/a.json").as_deref(), Some("\"v2\""));

        assert_eq!(store.remove_etag("https://x/a.json").as_deref(), Some("\"v2\""));
        assert_eq!(store.etag("https://x/a.json"), None);
    }

    #[test]
    fn test_forget_tokens_keeps_shared_items() {
        let store = SubscriptionStore::in_memory(SyncSettings::default());
        let mut a = SubscriptionRepo::new("A", "https://x/a.yaml");
        a.item_urls = vec!["https://x/1.json".into(), "https://x/2.json".into()];
        let mut b = SubscriptionRepo::new("B", "https://x/b.yaml");
        b.item_urls = vec!["https://x/2.json".into()];
        store.add_repo(a);
        store.add_repo(b);
        for url in ["https://x/a.yaml", "https://x/1.json", "https://x/2.json", "https://x/b.yaml"] {
            store.set_etag(url, "\"t\"");
        }

        let removed = store.remove_repo("https://x/a.yaml").unwrap();
        assert_eq!(store.forget_tokens(&removed), 2);
        assert_eq!(store.etag("https://x/a.yaml"), None);
        assert_eq!(store.etag("https://x/1.json"), None);
        assert!(store.etag("https://x/2.json").is_some());
        assert!(store.etag("https://x/b.yaml").is_some());
    }

    #[test]
    fn test_add_repo_rejects_duplicates() {
        let store = SubscriptionStore::in_memory(SyncSettings::default());
        assert!(store.add_repo(SubscriptionRepo::new("A", "https://x/a.yaml")));
        assert!(!store.add_repo(SubscriptionRepo::new("A again", "https://x/a.yaml")));
        assert_eq!(store.repo("https://x/a.yaml").unwrap().name, "A");
    }

    #[test]
    fn test_repos_keep_subscription_order() {
        let store = SubscriptionStore::in_memory(SyncSettings::default());
        store.add_repo(SubscriptionRepo::new("Z", "https://x/z.yaml"));
        store.add_repo(SubscriptionRepo::new("A", "https://x/a.yaml"));
        store.add_repo(SubscriptionRepo::new("M", "https://x/m.yaml"));

        let names: Vec<String> = store.repos().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Z", "A", "M"]);
    }

    #[test]
    fn test_update_repo() {
        let store = SubscriptionStore::in_memory(SyncSettings::default());
        store.add_repo(SubscriptionRepo::new("A", "https://x/a.yaml"));

        assert!(store.update_repo("https://x/a.yaml", |r| r.has_updates = false));
        assert!(!store.repo("https://x/a.yaml").unwrap().has_updates);
        assert!(!store.update_repo("https://x/missing.yaml", |r| r.has_updates = false));
    }

    #[test]
    fn test_concurrent_etag_writes() {
        let store = Arc::new(SubscriptionStore::in_memory(SyncSettings::default()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.set_etag(&format!("https://x/{i}/{j}.json"), &format!("{i}-{j}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.to_config().url_to_etags.len(), 400);
    }

    #[test]
    fn test_save_and_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yaml");

        let store = SubscriptionStore::open(&path).unwrap();
        store.add_repo(SubscriptionRepo::new("A", "https://x/a.yaml"));
        store.add_repo(SubscriptionRepo::new("B", "https://x/b.yaml"));
        store.set_etag("https://x/a.yaml", "\"m1\"");
        store.save().unwrap();

        let reopened = SubscriptionStore::open(&path).unwrap();
        assert_eq!(reopened.repos().len(), 2);
        assert_eq!(reopened.etag("https://x/a.yaml").as_deref(), Some("\"m1\""));

        // Orders continue after the highest persisted one
        reopened.add_repo(SubscriptionRepo::new("C", "https://x/c.yaml"));
        let names: Vec<String> = reopened.repos().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_library_path_follows_config() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yaml");
        let store = SubscriptionStore::open(&path).unwrap();
        assert_eq!(store.library_path(), temp.path().join("presets.json"));
    }
}
