//! Error taxonomy.
//!
//! | Family              | Raised by                | Scope of the failure                 |
//! |---------------------|--------------------------|--------------------------------------|
//! | [`ResolutionError`] | [`crate::resolve`]       | one language's registration only     |
//! | [`ValidationError`] | [`crate::dispatch`]      | one request; caused by the client    |
//! | [`SynthesisError`]  | [`crate::dispatch`]      | one request; server-side, not retried|

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    language::{ArtifactKind, LanguageCode},
    resolve::Provenance,
};

/// Opaque failure from a collaborator (synthesis backend, model loader),
/// kept as the `source()` of the error that reports it.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct BackendError(#[from] anyhow::Error);

impl BackendError {
    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No source yielded the artifact.
    #[error("{kind} for {language} not found (tried {}): {reason}", format_sources(.attempted))]
    NotFound {
        language: LanguageCode,
        kind: ArtifactKind,
        attempted: Vec<Provenance>,
        reason: String,
    },

    /// The offline layout has something at the expected location, but not a file.
    #[error("offline {kind} for {language} at {} is not a regular file", .path.display())]
    OfflineMismatch {
        language: LanguageCode,
        kind: ArtifactKind,
        path: PathBuf,
    },
}

impl ResolutionError {
    pub fn language(&self) -> &LanguageCode {
        match self {
            Self::NotFound { language, .. } | Self::OfflineMismatch { language, .. } => language,
        }
    }
}

fn format_sources(sources: &[Provenance]) -> String {
    if sources.is_empty() {
        return "no sources".to_string();
    }
    sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" → ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Request validation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown language '{requested}'; available: {available:?}")]
    UnknownLanguage {
        requested: String,
        available: Vec<LanguageCode>,
    },

    #[error("unknown speaker '{speaker}' for {language}; available: {available:?}")]
    UnknownSpeaker {
        language: LanguageCode,
        speaker: String,
        available: Vec<String>,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis backend for {language} failed")]
    BackendFailure {
        language: LanguageCode,
        #[source]
        source: BackendError,
    },

    /// The backend reported success but produced no audio.
    #[error("synthesis backend for {language} returned no audio")]
    EmptyOutput { language: LanguageCode },

    /// Writing the persisted output file failed.
    #[error("cannot persist synthesised audio")]
    Output(#[source] std::io::Error),
}

/// Everything [`crate::dispatch::RequestDispatcher::synthesize`] can fail with.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

impl DispatchError {
    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::UnknownLanguage { .. }) => "unknown_language",
            Self::Validation(ValidationError::UnknownSpeaker { .. }) => "unknown_speaker",
            Self::Validation(ValidationError::InvalidParameter { .. }) => "invalid_parameter",
            Self::Synthesis(SynthesisError::BackendFailure { .. }) => "backend_failure",
            Self::Synthesis(SynthesisError::EmptyOutput { .. }) => "empty_output",
            Self::Synthesis(SynthesisError::Output(_)) => "output_failure",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    fn en() -> LanguageCode {
        LanguageCode::parse("EN").unwrap()
    }

    #[test]
    fn test_not_found_lists_attempted_sources() {
        let err = ResolutionError::NotFound {
            language: en(),
            kind: ArtifactKind::Config,
            attempted: vec![Provenance::Explicit, Provenance::OfflineLocal],
            reason: "missing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("config for EN"), "{msg}");
        assert!(msg.contains("explicit → offline-local"), "{msg}");
        assert_eq!(err.language(), &en());
    }

    #[test]
    fn test_backend_failure_keeps_cause() {
        let err = SynthesisError::BackendFailure {
            language: en(),
            source: anyhow::anyhow!("CUDA out of memory").into(),
        };
        let cause = err.source().expect("cause attached");
        assert_eq!(cause.to_string(), "CUDA out of memory");
    }

    #[test]
    fn test_dispatch_kinds() {
        let v: DispatchError = ValidationError::InvalidParameter {
            name: "speed",
            reason: "too fast".into(),
        }
        .into();
        assert_eq!(v.kind(), "invalid_parameter");
        assert!(v.is_client_error());

        let s: DispatchError = SynthesisError::EmptyOutput { language: en() }.into();
        assert_eq!(s.kind(), "empty_output");
        assert!(!s.is_client_error());
    }
}
