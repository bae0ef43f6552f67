//! Shared integration test helpers for waymark-sync.
//!
//! Include this module at the top of each test file that needs it:
//!
//! ```ignore
//! mod common;
//! use common::{Harness, ScriptedTransport};
//! ```
//!
//! The `#[allow(dead_code)]` attribute suppresses warnings when only a subset
//! of helpers are used per file.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;
use waymark_sync::config::{Config, SubscriptionStore, SyncSettings};
use waymark_sync::http::{HttpResponse, Transport, TransportError};
use waymark_sync::library::{PresetLibrary, PresetStore, Waymark, WaymarkPreset};
use waymark_sync::subscription::{SharedLibrary, SubscriptionManager};

pub const REPO: &str = "https://x/manifest.yaml";

/// Requests that block until released.
#[derive(Default)]
struct Held {
    all: bool,
    urls: HashSet<String>,
}

impl Held {
    fn blocks(&self, url: &str) -> bool {
        self.all || self.urls.contains(url)
    }
}

/// In-memory [`Transport`] with per-URL scripted responses.
///
/// Every request is counted, including ones for unknown URLs (which answer
/// 404). `hold` makes every request block until `release`; `hold_url`
/// blocks only one URL.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Result<HttpResponse, TransportError>>>,
    hits: Mutex<HashMap<String, usize>>,
    held: Mutex<Held>,
    released: Condvar,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: &str, etag: Option<&str>) {
        self.routes
            .lock()
            .insert(url.to_string(), Ok(HttpResponse::new(body, etag)));
    }

    pub fn fail(&self, url: &str, error: TransportError) {
        self.routes.lock().insert(url.to_string(), Err(error));
    }

    pub fn hold(&self) {
        self.held.lock().all = true;
    }

    pub fn hold_url(&self, url: &str) {
        self.held.lock().urls.insert(url.to_string());
    }

    pub fn release(&self) {
        *self.held.lock() = Held::default();
        self.released.notify_all();
    }

    /// Sleep this long inside every request.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.hits.lock().values().sum()
    }

    pub fn reset_counts(&self) {
        self.hits.lock().clear();
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Poll until `url` has been requested at least once.
    pub async fn wait_for_request(&self, url: &str) {
        for _ in 0..500 {
            if self.requests(url) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{url} was never requested");
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        *self.hits.lock().entry(url.to_string()).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        {
            let mut held = self.held.lock();
            while held.blocks(url) {
                self.released.wait(&mut held);
            }
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.routes
            .lock()
            .get(url)
            .cloned()
            .unwrap_or(Err(TransportError::Status(404)))
    }
}

/// Waymark preset JSON with a single active mark at `x`.
pub fn preset_json(name: &str, x: f32) -> String {
    WaymarkPreset {
        name: name.to_string(),
        map_id: 1,
        a: Waymark {
            x,
            y: 0.0,
            z: 0.0,
            id: 0,
            active: true,
        },
        ..WaymarkPreset::default()
    }
    .to_json()
    .expect("serialize preset")
}

/// Manifest named `name` under `https://x/` whose items are `<item>.json`.
pub fn manifest_yaml(name: &str, items: &[&str]) -> String {
    let mut yaml = format!("name: {name}\nfolderurl: https://x/\nwaymarks:\n");
    for item in items {
        yaml.push_str(&format!("  - name: {item}\n    url: {item}.json\n"));
    }
    yaml
}

pub fn item_url(item: &str) -> String {
    format!("https://x/{item}.json")
}

/// A manager over an on-disk config and library in a temp dir.
///
/// Must be created inside a Tokio runtime. The `TempDir` lives as long as
/// the harness.
pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<SubscriptionStore>,
    pub library: SharedLibrary,
    pub manager: SubscriptionManager,
    pub temp_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yaml");
        let config = Config {
            sync: settings,
            ..Default::default()
        };
        config.save_to(&config_path).expect("write config");

        let store = Arc::new(SubscriptionStore::open(&config_path).expect("open store"));
        let library: SharedLibrary = Arc::new(tokio::sync::Mutex::new(
            PresetStore::open(&store.library_path()).expect("open library"),
        ));
        let transport = ScriptedTransport::new();
        let manager = SubscriptionManager::new(
            Arc::clone(&store),
            Arc::clone(&library),
            transport.clone(),
            tokio::runtime::Handle::current(),
        );
        Self {
            transport,
            store,
            library,
            manager,
            temp_dir,
        }
    }

    pub fn config_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("config.yaml")
    }

    /// Serve a manifest for [`REPO`] plus one preset per item.
    pub fn serve_pack(&self, manifest_etag: &str, items: &[(&str, f32, &str)]) {
        let names: Vec<&str> = items.iter().map(|(name, _, _)| *name).collect();
        self.transport
            .serve(REPO, &manifest_yaml("Pack", &names), Some(manifest_etag));
        for (name, x, etag) in items {
            self.transport
                .serve(&item_url(name), &preset_json(name, *x), Some(*etag));
        }
    }

    /// Subscribe to [`REPO`] and wait for the job.
    pub async fn subscribe(&self) {
        self.manager
            .subscribe(REPO)
            .expect("subscribe accepted")
            .wait()
            .await
            .expect("subscribe job");
    }

    pub async fn preset_names(&self) -> Vec<String> {
        let library = self.library.lock().await;
        (0..library.len())
            .filter_map(|i| library.name_at(i).map(str::to_string))
            .collect()
    }
}
