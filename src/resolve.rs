//! Artifact resolution chain.
//!
//! Sources are tried in a fixed order and the first success wins:
//!
//! 1. **explicit**: a caller-supplied path, used verbatim when it exists.
//! 2. **offline-local**: `<root>/models/<LANG>/<config|model>/<file>`.
//!    Skipped when no root is configured.  Once a root *is* configured it is
//!    authoritative: a missing file fails here and remote sources are never
//!    consulted.
//! 3. **hub** *or* **url-cache**: exactly one remote source, chosen by
//!    [`RemoteMode`].  A failed hub fetch does not cascade to the URL cache.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Result;
use serde::Serialize;

use crate::{
    catalog::{RemoteCatalog, BERT_FILES, BERT_OPTIONAL_FILES},
    error::ResolutionError,
    language::{ArtifactKind, LanguageCode},
};

// ─────────────────────────────────────────────────────────────────────────────
// Provenance / ResolvedArtifact
// ─────────────────────────────────────────────────────────────────────────────

/// Which source satisfied (or was tried for) an artifact lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Explicit,
    OfflineLocal,
    Hub,
    UrlCache,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::OfflineLocal => "offline-local",
            Self::Hub => "hub",
            Self::UrlCache => "url-cache",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A located artifact.  `provenance` is for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub provenance: Provenance,
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote fetchers
// ─────────────────────────────────────────────────────────────────────────────

/// Fetch a named file from a hub repository into a local cache.
///
/// Implementations must be idempotent: the same `(repo_id, filename)` returns
/// the same cached path without downloading again.
pub trait HubFetcher: Send + Sync {
    fn fetch(&self, repo_id: &str, filename: &str) -> Result<PathBuf>;
}

/// Fetch a URL into a content-addressed local cache.  Idempotent per URL.
pub trait UrlFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<PathBuf>;
}

/// Which remote source a resolver consults after the local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMode {
    #[default]
    Hub,
    Url,
    /// Local sources only.
    None,
}

impl FromStr for RemoteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hub" | "hf" => Ok(Self::Hub),
            "url" | "url-cache" => Ok(Self::Url),
            "none" | "offline" => Ok(Self::None),
            other => Err(format!("unknown remote mode '{other}' (expected hub, url or none)")),
        }
    }
}

enum Remote {
    Hub(Box<dyn HubFetcher>),
    Url(Box<dyn UrlFetcher>),
    None,
}

// ─────────────────────────────────────────────────────────────────────────────
// ResourceResolver
// ─────────────────────────────────────────────────────────────────────────────

pub struct ResourceResolver {
    offline_root: Option<PathBuf>,
    catalog: RemoteCatalog,
    remote: Remote,
}

impl ResourceResolver {
    /// A resolver with no offline root and no remote source.
    pub fn local_only() -> Self {
        Self { offline_root: None, catalog: RemoteCatalog::builtin(), remote: Remote::None }
    }

    pub fn with_offline_root(mut self, root: Option<PathBuf>) -> Self {
        self.offline_root = root;
        self
    }

    pub fn with_catalog(mut self, catalog: RemoteCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_hub(mut self, fetcher: impl HubFetcher + 'static) -> Self {
        self.remote = Remote::Hub(Box::new(fetcher));
        self
    }

    pub fn with_url_cache(mut self, fetcher: impl UrlFetcher + 'static) -> Self {
        self.remote = Remote::Url(Box::new(fetcher));
        self
    }

    pub fn remote_mode(&self) -> RemoteMode {
        match self.remote {
            Remote::Hub(_) => RemoteMode::Hub,
            Remote::Url(_) => RemoteMode::Url,
            Remote::None => RemoteMode::None,
        }
    }

    /// Locate one artifact for `language`.
    pub fn resolve(
        &self,
        language: &LanguageCode,
        kind: ArtifactKind,
        explicit: Option<&Path>,
    ) -> Result<ResolvedArtifact, ResolutionError> {
        let mut attempted = Vec::new();
        let not_found = |attempted: Vec<Provenance>, reason: String| ResolutionError::NotFound {
            language: language.clone(),
            kind,
            attempted,
            reason,
        };

        // ── 1. Explicit path ─────────────────────────────────────────────────
        if let Some(path) = explicit {
            attempted.push(Provenance::Explicit);
            if path.exists() {
                return Ok(self.found(language, kind, path.to_path_buf(), Provenance::Explicit));
            }
            tracing::warn!(%language, %kind, path = %path.display(), "explicit path does not exist");
        }

        // ── 2. Offline layout (authoritative once a root is set) ─────────────
        if let Some(root) = &self.offline_root {
            attempted.push(Provenance::OfflineLocal);
            let candidate = offline_path(root, language, kind);
            if candidate.is_file() {
                return Ok(self.found(language, kind, candidate, Provenance::OfflineLocal));
            }
            if candidate.exists() {
                return Err(ResolutionError::OfflineMismatch {
                    language: language.clone(),
                    kind,
                    path: candidate,
                });
            }
            return Err(not_found(
                attempted,
                format!(
                    "expected {} at {}; the offline model structure is incomplete",
                    kind.file_name(),
                    candidate.display()
                ),
            ));
        }

        // ── 3. Exactly one remote source ─────────────────────────────────────
        match &self.remote {
            Remote::Hub(fetcher) => {
                attempted.push(Provenance::Hub);
                let Some(repo_id) = self.catalog.hub_repo(language) else {
                    return Err(not_found(attempted, "no hub repository for this language".into()));
                };
                match fetcher.fetch(repo_id, kind.file_name()) {
                    Ok(path) => Ok(self.found(language, kind, path, Provenance::Hub)),
                    Err(e) => Err(not_found(attempted, format!("{e:#}"))),
                }
            }
            Remote::Url(fetcher) => {
                attempted.push(Provenance::UrlCache);
                let Some(url) = self.catalog.url(language, kind) else {
                    return Err(not_found(attempted, "no download URL for this language".into()));
                };
                match fetcher.fetch(url) {
                    Ok(path) => Ok(self.found(language, kind, path, Provenance::UrlCache)),
                    Err(e) => Err(not_found(attempted, format!("{e:#}"))),
                }
            }
            Remote::None => Err(not_found(attempted, "no remaining source".into())),
        }
    }

    /// Fetch the shared pretrained components through the URL cache.
    ///
    /// Only available when the resolver was built with a URL fetcher.
    pub fn fetch_pretrained(&self) -> Result<Vec<PathBuf>> {
        let Remote::Url(fetcher) = &self.remote else {
            anyhow::bail!("pretrained components are only published as direct URLs; use the url remote");
        };
        self.catalog
            .pretrained()
            .iter()
            .map(|(name, url)| {
                let path = fetcher.fetch(url)?;
                tracing::info!(file = %name, path = %path.display(), "pretrained component cached");
                Ok(path)
            })
            .collect()
    }

    /// Pre-cache the text-encoder repositories of `languages` through the hub.
    ///
    /// Repositories shared by several languages are fetched once. Languages
    /// without a known repository are skipped. Returns `(repo_id, paths)` in
    /// first-seen order.
    pub fn fetch_bert(&self, languages: &[LanguageCode]) -> Result<Vec<(String, Vec<PathBuf>)>> {
        let Remote::Hub(fetcher) = &self.remote else {
            anyhow::bail!("text-encoder models are only published on the hub; use the hub remote");
        };
        let mut repos: Vec<&str> = Vec::new();
        for language in languages {
            match self.catalog.bert_repo(language) {
                Some(repo) if !repos.contains(&repo) => repos.push(repo),
                Some(_) => {}
                None => tracing::debug!(%language, "no text-encoder repository"),
            }
        }

        repos
            .into_iter()
            .map(|repo| {
                let mut paths = Vec::new();
                for file in BERT_FILES {
                    paths.push(fetcher.fetch(repo, file)?);
                }
                for file in BERT_OPTIONAL_FILES {
                    match fetcher.fetch(repo, file) {
                        Ok(path) => paths.push(path),
                        Err(e) => tracing::debug!(repo, file, error = %e, "optional file not fetched"),
                    }
                }
                tracing::info!(repo, files = paths.len(), "text encoder cached");
                Ok((repo.to_string(), paths))
            })
            .collect()
    }

    fn found(
        &self,
        language: &LanguageCode,
        kind: ArtifactKind,
        path: PathBuf,
        provenance: Provenance,
    ) -> ResolvedArtifact {
        tracing::info!(%language, %kind, %provenance, path = %path.display(), "artifact resolved");
        ResolvedArtifact { path, provenance }
    }
}

/// `<root>/models/<LANG>/<config|model>/<file>`
pub fn offline_path(root: &Path, language: &LanguageCode, kind: ArtifactKind) -> PathBuf {
    root.join("models")
        .join(language.as_str())
        .join(kind.offline_dir())
        .join(kind.file_name())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
