//! Process-wide model registry.
//!
//! Lifecycle: built once at startup by [`ModelRegistry::build`], read
//! concurrently for the rest of the process, dropped at shutdown.  There is no
//! reload.  A language whose artifacts cannot be resolved or whose model fails
//! to load is logged and left out; the others are unaffected.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::{
    backend::{BackendLoader, Device},
    language::{ArtifactKind, LanguageCode},
    model::ModelHandle,
    resolve::ResourceResolver,
};

/// One configured language and its optional explicit artifact paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    pub language: LanguageCode,
    pub config_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
}

impl LanguageSpec {
    pub fn new(language: LanguageCode) -> Self {
        Self { language, config_path: None, checkpoint_path: None }
    }
}

/// A language left out of the registry, and why.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedLanguage {
    pub language: LanguageCode,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    handles: Vec<Arc<ModelHandle>>,
    by_language: HashMap<LanguageCode, usize>,
    dropped: Vec<DroppedLanguage>,
}

impl ModelRegistry {
    /// Resolve, load and index every configured language, independently.
    pub fn build(
        specs: &[LanguageSpec],
        device: Device,
        resolver: &ResourceResolver,
        loader: &dyn BackendLoader,
    ) -> Self {
        let mut registry = Self::default();
        for spec in specs {
            if registry.by_language.contains_key(&spec.language) {
                tracing::warn!(language = %spec.language, "language configured twice; keeping the first");
                continue;
            }
            // A panicking loader must not take the other languages down with it.
            let outcome = catch_unwind(AssertUnwindSafe(|| load_one(spec, device, resolver, loader)))
                .unwrap_or_else(|_| Err(anyhow!("model loader panicked")));
            match outcome {
                Ok(handle) => {
                    tracing::info!(
                        language = %spec.language,
                        speakers = handle.speakers().len(),
                        "model registered"
                    );
                    registry.insert(Arc::new(handle));
                }
                Err(e) => {
                    tracing::warn!(language = %spec.language, error = %format!("{e:#}"), "language dropped");
                    registry.dropped.push(DroppedLanguage {
                        language: spec.language.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
        if registry.is_empty() {
            tracing::error!("no language could be loaded; every synthesis request will be rejected");
        }
        registry
    }

    /// Registry over already-constructed handles, in the given order.
    pub fn from_handles(handles: impl IntoIterator<Item = ModelHandle>) -> Self {
        let mut registry = Self::default();
        for handle in handles {
            if !registry.by_language.contains_key(handle.language()) {
                registry.insert(Arc::new(handle));
            }
        }
        registry
    }

    fn insert(&mut self, handle: Arc<ModelHandle>) {
        self.by_language.insert(handle.language().clone(), self.handles.len());
        self.handles.push(handle);
    }

    pub fn lookup(&self, language: &LanguageCode) -> Option<&Arc<ModelHandle>> {
        self.by_language.get(language).map(|&i| &self.handles[i])
    }

    /// Loaded languages in configuration order.
    pub fn list(&self) -> Vec<LanguageCode> {
        self.handles.iter().map(|h| h.language().clone()).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<ModelHandle>> {
        self.handles.iter()
    }

    pub fn dropped(&self) -> &[DroppedLanguage] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn load_one(
    spec: &LanguageSpec,
    device: Device,
    resolver: &ResourceResolver,
    loader: &dyn BackendLoader,
) -> Result<ModelHandle> {
    let config = resolver.resolve(&spec.language, ArtifactKind::Config, spec.config_path.as_deref())?;
    let checkpoint =
        resolver.resolve(&spec.language, ArtifactKind::Checkpoint, spec.checkpoint_path.as_deref())?;
    ModelHandle::load(spec.language.clone(), config, checkpoint, device, loader)
}
