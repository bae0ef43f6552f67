//! Manifest and item fetchers with ETag-based change detection.
//!
//! Every fetch is a plain GET; the server's `ETag` is compared against the
//! last committed value for the same URL:
//! - no stored token, or a different one: changed
//! - equal token: unchanged
//! - no token in the response: changed, and nothing can be committed
//!
//! Fetching never writes the token store. Callers commit a [`Fetched`] once
//! they have acted on it, so a failed import leaves the item detectable as
//! changed on the next run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use waymark_sync_config::SubscriptionStore;

use super::error::{Result, SyncError};
use super::manifest::Manifest;
use crate::http::{HttpResponse, Transport, TransportError};

/// A fetched resource together with its change verdict.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub url: String,
    pub value: T,
    pub changed: bool,
    /// Token returned by the server, if any
    pub etag: Option<String>,
}

/// Shared fetch front-end over a [`Transport`] and the token store.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    store: Arc<SubscriptionStore>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<SubscriptionStore>) -> Self {
        Self { transport, store }
    }

    /// GET and decode a manifest. Fails with `NetworkFailure` or
    /// `ManifestFormat`.
    pub async fn fetch_manifest(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Manifest>> {
        let response = self.get(url, cancel).await?;
        let manifest = Manifest::parse(&response.body).map_err(|message| {
            SyncError::ManifestFormat {
                url: url.to_string(),
                message,
            }
        })?;
        Ok(self.classify(url, manifest, response.etag))
    }

    /// GET an item payload. Decoding is left to the caller.
    pub async fn fetch_item(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Fetched<String>> {
        let response = self.get(url, cancel).await?;
        Ok(self.classify(url, response.body, response.etag))
    }

    /// Record the fetched token as last-seen, even when unchanged.
    ///
    /// Returns `false` when the response carried no token.
    pub fn commit<T>(&self, fetched: &Fetched<T>) -> bool {
        match &fetched.etag {
            Some(etag) => {
                self.store.set_etag(&fetched.url, etag);
                crate::debug_log!("SUBSCRIPTION", "Committed ETag {} for {}", etag, fetched.url);
                true
            }
            None => false,
        }
    }

    fn classify<T>(&self, url: &str, value: T, etag: Option<String>) -> Fetched<T> {
        let changed = match (&etag, self.store.etag(url)) {
            (Some(new), Some(old)) => *new != old,
            _ => true,
        };
        crate::debug_log!(
            "SUBSCRIPTION",
            "{} {} (etag={:?})",
            url,
            if changed { "changed" } else { "unchanged" },
            etag
        );
        Fetched {
            url: url.to_string(),
            value,
            changed,
            etag,
        }
    }

    /// Run the blocking transport off the async workers, abandoning the
    /// request as soon as `cancel` fires.
    async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                url: url.to_string(),
            });
        }

        let transport = Arc::clone(&self.transport);
        let target = url.to_string();
        let request = tokio::task::spawn_blocking(move || transport.get(&target));

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SyncError::Cancelled { url: url.to_string() });
            }
            joined = request => joined,
        };

        let result = joined.unwrap_or_else(|e| Err(TransportError::Request(e.to_string())));
        result.map_err(|source| {
            log::warn!("Fetch of {} failed: {}", url, source);
            SyncError::NetworkFailure {
                url: url.to_string(),
                source,
            }
        })
    }
}
