//! Repository manifest document.
//!
//! ```yaml
//! name: Savage Raids
//! folderurl: https://example.com/presets/
//! waymarks:
//!   - name: P1 Default
//!     url: p1.json
//! ```

use serde::Deserialize;
use url::Url;

/// A repository's index of presets. Only its ETag outlives a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manifest {
    /// Display name, used for the `[name]` prefix of imported presets
    pub name: String,
    /// Base URL item URLs are resolved against
    pub folderurl: String,
    pub waymarks: Vec<ManifestItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestItem {
    pub name: String,
    /// Item location, relative to `folderurl` or an absolute http(s) URL
    pub url: String,
    /// `url` resolved against the folder, filled in by [`Manifest::parse`]
    #[serde(skip)]
    location: String,
}

impl ManifestItem {
    /// Absolute URL of this item.
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl Manifest {
    /// Decode a manifest body and resolve every item URL, returning a
    /// description of what is wrong.
    pub fn parse(body: &str) -> Result<Self, String> {
        let mut manifest: Manifest =
            serde_yaml_ng::from_str(body).map_err(|e| e.to_string())?;
        if manifest.name.trim().is_empty() {
            return Err("manifest name is empty".to_string());
        }

        let base = folder_base(&manifest.folderurl)
            .map_err(|e| format!("invalid folderurl '{}': {e}", manifest.folderurl))?;
        for item in &mut manifest.waymarks {
            item.location = resolve_item(&base, &item.url)
                .map_err(|e| format!("invalid url '{}' for '{}': {e}", item.url, item.name))?
                .into();
        }
        Ok(manifest)
    }

    /// Absolute URLs of every item, in manifest order.
    pub fn item_urls(&self) -> Vec<String> {
        self.waymarks.iter().map(|item| item.location.clone()).collect()
    }
}

/// The folder URL as a directory, so relative items land inside it.
fn folder_base(folderurl: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(folderurl)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Absolute http(s) URLs are kept; anything else is a path inside the folder.
fn resolve_item(base: &Url, item: &str) -> Result<Url, url::ParseError> {
    match Url::parse(item) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => base.join(&format!("./{}", item.trim_start_matches('/'))),
    }
}
