//! HTTP transport for manifest and preset downloads.
//!
//! Production uses a ureq agent with native-tls, which uses the system's TLS
//! library (Schannel on Windows, OpenSSL on Linux, Security.framework on
//! macOS). The sync core only sees the [`Transport`] trait so tests can
//! script responses without a network.

use std::time::Duration;

use thiserror::Error;
use ureq::Agent;
use ureq::tls::{RootCerts, TlsConfig, TlsProvider};
use waymark_sync_config::SyncSettings;

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("waymark-sync/", env!("CARGO_PKG_VERSION"));

/// Connection pool size per host, matching the default fetch ceiling.
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 4;

/// A completed GET with a success status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub body: String,
    /// Value of the `ETag` response header, verbatim
    pub etag: Option<String>,
}

impl HttpResponse {
    pub fn new(body: impl Into<String>, etag: Option<&str>) -> Self {
        Self {
            body: body.into(),
            etag: etag.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("server returned HTTP {0}")]
    Status(u16),

    /// DNS, connect, TLS or timeout failure.
    #[error("request failed: {0}")]
    Request(String),

    /// The body could not be read or exceeded the size limit.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Blocking GET used by the fetchers.
///
/// Implementations are called from `spawn_blocking`, so they may block.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&str) -> Result<HttpResponse, TransportError> + Send + Sync,
{
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self(url)
    }
}

/// Create a new HTTP agent configured with native-tls and a global timeout.
///
/// We use PlatformVerifier to use the system's built-in root certificates.
pub fn agent(timeout: Duration) -> Agent {
    let tls_config = TlsConfig::builder()
        .provider(TlsProvider::NativeTls)
        .root_certs(RootCerts::PlatformVerifier)
        .build();

    Agent::config_builder()
        .tls_config(tls_config)
        .timeout_global(Some(timeout))
        .max_idle_connections_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
        .build()
        .into()
}

/// The network-backed transport.
pub struct UreqTransport {
    agent: Agent,
    max_size_bytes: u64,
}

impl UreqTransport {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            agent: agent(Duration::from_secs(settings.fetch_timeout_secs)),
            max_size_bytes: settings.max_size_bytes as u64,
        }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        crate::debug_trace!("HTTP", "GET {}", url);

        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => TransportError::Status(code),
                other => TransportError::Request(other.to_string()),
            })?;

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .body_mut()
            .with_config()
            .limit(self.max_size_bytes)
            .read_to_string()
            .map_err(|e| TransportError::Body(e.to_string()))?;

        crate::debug_trace!(
            "HTTP",
            "GET {} -> {} bytes, etag={:?}",
            url,
            body.len(),
            etag
        );
        Ok(HttpResponse { body, etag })
    }
}

/// Validate a repository URL before subscribing to it.
///
/// Only `https` is accepted, plus plain `http` when `allow_http` is set.
/// Returns a description of the problem on rejection.
pub fn validate_repo_url(url: &str, allow_http: bool) -> Result<url::Url, String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("not a valid URL: {e}"))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {
            log::warn!(
                "Subscribing to '{}' over insecure HTTP; presets can be tampered with in transit",
                url
            );
        }
        "http" => {
            return Err("plain HTTP is disabled (set sync.allow_http to allow it)".to_string());
        }
        scheme => return Err(format!("unsupported scheme '{scheme}'")),
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err("URL has no host".to_string());
    }
    Ok(parsed)
}
