//! Service configuration, read once at startup.

use std::{collections::HashMap, path::PathBuf};

use anyhow::{bail, Context, Result};

use crate::{
    backend::Device,
    gate::DEFAULT_CONCURRENCY,
    language::LanguageCode,
    registry::LanguageSpec,
    resolve::{RemoteMode, ResourceResolver},
};

/// Environment variable naming the offline model root.
pub const OFFLINE_ROOT_ENV: &str = "MELOTTTS_MODELS";

/// Languages served when none are configured.
pub const DEFAULT_LANGUAGES: &[&str] = &["EN", "ES", "FR", "ZH", "JP", "KR"];

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Enabled languages, in the order they are listed to clients.
    pub languages: Vec<LanguageCode>,
    pub config_paths: HashMap<LanguageCode, PathBuf>,
    pub checkpoint_paths: HashMap<LanguageCode, PathBuf>,
    /// `<root>/models/<LANG>/{config,model}/…`; offline-only resolution when set.
    pub offline_root: Option<PathBuf>,
    pub remote: RemoteMode,
    /// Download cache root (platform cache directory when unset).
    pub cache_dir: Option<PathBuf>,
    pub device: Device,
    pub max_concurrency: usize,
    /// Directory for persisted synthesis output (system temp dir when unset).
    pub output_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES
                .iter()
                .filter_map(|l| LanguageCode::parse(l).ok())
                .collect(),
            config_paths: HashMap::new(),
            checkpoint_paths: HashMap::new(),
            offline_root: None,
            remote: RemoteMode::default(),
            cache_dir: None,
            device: Device::default(),
            max_concurrency: DEFAULT_CONCURRENCY,
            output_dir: None,
        }
    }
}

impl ServiceConfig {
    /// One [`LanguageSpec`] per enabled language, with its explicit paths.
    pub fn language_specs(&self) -> Vec<LanguageSpec> {
        self.languages
            .iter()
            .map(|language| LanguageSpec {
                language: language.clone(),
                config_path: self.config_paths.get(language).cloned(),
                checkpoint_path: self.checkpoint_paths.get(language).cloned(),
            })
            .collect()
    }

    /// Reject settings that cannot produce a working service.
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            bail!("no languages enabled");
        }
        if self.max_concurrency == 0 {
            bail!("max concurrency must be at least 1");
        }
        for language in self.config_paths.keys().chain(self.checkpoint_paths.keys()) {
            if !self.languages.contains(language) {
                bail!("explicit artifact path given for {language}, which is not enabled");
            }
        }
        if let Some(root) = &self.offline_root {
            if !root.is_dir() {
                bail!("offline model root {} is not a directory", root.display());
            }
        }
        Ok(())
    }

    /// Resolver for this configuration: offline root plus the selected remote.
    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    pub fn build_resolver(&self) -> Result<ResourceResolver> {
        use crate::download::{default_cache_dir, HfHub, UrlCache};

        let resolver = ResourceResolver::local_only().with_offline_root(self.offline_root.clone());
        Ok(match self.remote {
            RemoteMode::Hub => resolver.with_hub(HfHub::new(self.cache_dir.as_deref())?),
            RemoteMode::Url => {
                let dir = match &self.cache_dir {
                    Some(dir) => dir.clone(),
                    None => default_cache_dir()?,
                };
                resolver.with_url_cache(UrlCache::new(&dir)?)
            }
            RemoteMode::None => resolver,
        })
    }

    #[cfg(any(target_os = "ios", target_os = "android"))]
    pub fn build_resolver(&self) -> Result<ResourceResolver> {
        if self.remote != RemoteMode::None {
            bail!("remote artifact sources are not available on this platform");
        }
        Ok(ResourceResolver::local_only().with_offline_root(self.offline_root.clone()))
    }
}

/// Parse a comma- or whitespace-separated language list (`"EN, zh fr"`).
pub fn parse_languages(raw: &str) -> Result<Vec<LanguageCode>> {
    let mut out: Vec<LanguageCode> = Vec::new();
    for part in raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
        let code = LanguageCode::parse(part)?;
        if !out.contains(&code) {
            out.push(code);
        }
    }
    Ok(out)
}

/// Parse a `LANG=PATH` pair.
pub fn parse_language_path(raw: &str) -> Result<(LanguageCode, PathBuf)> {
    let (lang, path) = raw
        .split_once('=')
        .with_context(|| format!("expected LANG=PATH, got '{raw}'"))?;
    if path.is_empty() {
        bail!("empty path in '{raw}'");
    }
    Ok((LanguageCode::parse(lang)?, PathBuf::from(path)))
}
