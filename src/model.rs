//! One loaded model per language.
//!
//! A [`ModelHandle`] is immutable after construction: the backend, the parsed
//! configuration and the speaker catalog never change, so handles are shared
//! freely behind an `Arc` for concurrent lookups and synthesis.

use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    backend::{BackendLoader, BackendRequest, Device, LoadSpec, ProgressSink, SynthesisBackend},
    hparams::ModelConfig,
    language::LanguageCode,
    resolve::ResolvedArtifact,
    speakers::SpeakerCatalog,
};

pub struct ModelHandle {
    language: LanguageCode,
    config: ModelConfig,
    speakers: SpeakerCatalog,
    backend: Box<dyn SynthesisBackend>,
    artifacts: Option<(ResolvedArtifact, ResolvedArtifact)>,
}

impl ModelHandle {
    /// Parse the config artifact, derive the speaker catalog and load the backend.
    pub fn load(
        language: LanguageCode,
        config_artifact: ResolvedArtifact,
        checkpoint_artifact: ResolvedArtifact,
        device: Device,
        loader: &dyn BackendLoader,
    ) -> Result<Self> {
        let config = ModelConfig::load(&config_artifact.path)?;
        let speakers = SpeakerCatalog::from_config(&config)
            .with_context(|| format!("No usable speakers in {}", config_artifact.path.display()))?;

        let backend = loader
            .load(&LoadSpec {
                language: &language,
                config: &config,
                config_path: &config_artifact.path,
                checkpoint_path: &checkpoint_artifact.path,
                device,
            })
            .with_context(|| format!("Failed to load {} model", language))?;

        Ok(Self {
            language,
            config,
            speakers,
            backend,
            artifacts: Some((config_artifact, checkpoint_artifact)),
        })
    }

    /// Wrap an already-constructed backend (embedding, tests).
    pub fn from_parts(
        language: LanguageCode,
        config: ModelConfig,
        backend: Box<dyn SynthesisBackend>,
    ) -> Result<Self> {
        let speakers = SpeakerCatalog::from_config(&config)?;
        Ok(Self { language, config, speakers, backend, artifacts: None })
    }

    pub fn language(&self) -> &LanguageCode {
        &self.language
    }

    pub fn speakers(&self) -> &SpeakerCatalog {
        &self.speakers
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sampling_rate()
    }

    /// Resolved `(config, checkpoint)` when the handle was loaded from artifacts.
    pub fn artifacts(&self) -> Option<&(ResolvedArtifact, ResolvedArtifact)> {
        self.artifacts.as_ref()
    }

    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.artifacts.as_ref().map(|(_, ckpt)| ckpt.path.as_path())
    }

    pub(crate) fn backend(&self) -> &dyn SynthesisBackend {
        self.backend.as_ref()
    }

    /// Direct, ungated synthesis.  Servers go through the dispatcher instead.
    pub fn synthesize(
        &self,
        request: &BackendRequest<'_>,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Vec<u8>> {
        self.backend.synthesize(request, progress)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("language", &self.language)
            .field("speakers", &self.speakers.names())
            .field("sample_rate", &self.sample_rate())
            .finish_non_exhaustive()
    }
}
