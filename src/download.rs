//! Remote artifact fetchers: HuggingFace Hub and a content-addressed URL cache.
//!
//! Both are idempotent: a second request for the same input returns the same
//! cached path without touching the network.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use hf_hub::api::sync::{Api, ApiBuilder};
use sha2::{Digest, Sha256};

use crate::resolve::{HubFetcher, UrlFetcher};

/// Platform cache directory used when none is configured.
pub fn default_cache_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("ai", "MyShell", "melotts")
        .ok_or_else(|| anyhow!("could not determine platform cache directory"))?;
    Ok(dirs.cache_dir().to_path_buf())
}

// ─────────────────────────────────────────────────────────────────────────────
// HuggingFace Hub
// ─────────────────────────────────────────────────────────────────────────────

/// [`HubFetcher`] over `hf-hub`'s blocking client.
///
/// Files land in the HuggingFace cache layout (`~/.cache/huggingface/hub` by
/// default, or `<cache_dir>/hub`); `hf-hub` returns the cached snapshot path
/// when the file is already present.
pub struct HfHub {
    api: Api,
}

impl HfHub {
    pub fn new(cache_dir: Option<&Path>) -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir.join("hub"));
        }
        let api = builder.build().context("Failed to initialise HuggingFace Hub client")?;
        Ok(Self { api })
    }
}

impl HubFetcher for HfHub {
    fn fetch(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        tracing::debug!(repo_id, filename, "fetching from hub");
        self.api
            .model(repo_id.to_string())
            .get(filename)
            .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL cache
// ─────────────────────────────────────────────────────────────────────────────

/// Transfers one URL to a local file.  Separated from [`UrlCache`] so the
/// cache logic can be exercised without a network.
pub trait Download: Send + Sync {
    fn download(&self, url: &str, dest: &mut File) -> Result<()>;
}

/// Blocking HTTP download via `reqwest`.
pub struct HttpDownload {
    client: reqwest::blocking::Client,
}

impl HttpDownload {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("melotts-serve/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Download for HttpDownload {
    fn download(&self, url: &str, dest: &mut File) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("HTTP request failed for {url}"))?
            .error_for_status()
            .with_context(|| format!("Download failed for {url}"))?;
        io::copy(&mut response, dest).with_context(|| format!("Failed writing body of {url}"))?;
        Ok(())
    }
}

/// [`UrlFetcher`] storing each URL at `<root>/url-cache/<sha256(url)>/<basename>`.
pub struct UrlCache<D = HttpDownload> {
    root: PathBuf,
    transport: D,
}

impl UrlCache<HttpDownload> {
    pub fn new(cache_dir: &Path) -> Result<Self> {
        Ok(Self::with_transport(cache_dir, HttpDownload::new()?))
    }
}

impl<D: Download> UrlCache<D> {
    pub fn with_transport(cache_dir: &Path, transport: D) -> Self {
        Self { root: cache_dir.join("url-cache"), transport }
    }

    /// Where `url` is (or would be) cached.
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.root.join(hex::encode(digest)).join(url_basename(url))
    }
}

impl<D: Download> UrlFetcher for UrlCache<D> {
    fn fetch(&self, url: &str) -> Result<PathBuf> {
        let dest = self.cached_path(url);
        if dest.is_file() {
            tracing::debug!(url, path = %dest.display(), "url cache hit");
            return Ok(dest);
        }

        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed creating cache dir {}", dir.display()))?;

        // Each fetch downloads into its own temp file beside the destination,
        // then renames: a reader never sees a partial file at the cached path.
        let mut temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(dir)
            .with_context(|| format!("Failed creating temp file in {}", dir.display()))?;
        self.transport.download(url, temp.as_file_mut())?;
        temp.as_file_mut().flush()?;

        if let Err(e) = temp.persist(&dest) {
            // A concurrent fetch of the same URL may have won the rename.
            if !dest.is_file() {
                return Err(e.error).with_context(|| {
                    format!("Failed moving {} to {}", e.file.path().display(), dest.display())
                });
            }
            tracing::debug!(url, path = %dest.display(), "url cached by a concurrent fetch");
            return Ok(dest);
        }
        tracing::info!(url, path = %dest.display(), "downloaded into url cache");
        Ok(dest)
    }
}

fn url_basename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "artifact",
    }
}
