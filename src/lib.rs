//! # melotts-serve
//!
//! Serves pre-trained, language-specific MeloTTS models behind one HTTP API.
//!
//! The crate is two coupled subsystems:
//!
//! * **artifact resolution**: [`resolve::ResourceResolver`] finds each
//!   language's `config.json` and `checkpoint.pth` through an ordered chain of
//!   sources (explicit path, offline layout, HuggingFace Hub or URL cache);
//! * **multi-model serving**: [`registry::ModelRegistry`] holds one
//!   [`model::ModelHandle`] per language, and [`dispatch::RequestDispatcher`]
//!   validates requests against each model's own speaker table before running
//!   synthesis under a global [`gate::ConcurrencyGate`].
//!
//! The neural network itself is external: it is reached through the
//! [`backend::SynthesisBackend`] trait.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use melotts_serve::{
//!     backend::{Device, ProcessLoader},
//!     dispatch::{OutputMode, RequestDispatcher, SynthesisOutput, SynthesisRequest},
//!     download::HfHub,
//!     gate::ConcurrencyGate,
//!     language::LanguageCode,
//!     registry::{LanguageSpec, ModelRegistry},
//!     resolve::ResourceResolver,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let resolver = ResourceResolver::local_only().with_hub(HfHub::new(None)?);
//! let loader = ProcessLoader::new("melo-synth", vec![]);
//! let registry = ModelRegistry::build(
//!     &[LanguageSpec::new(LanguageCode::parse("EN")?)],
//!     Device::Auto,
//!     &resolver,
//!     &loader,
//! );
//!
//! let dispatcher = RequestDispatcher::new(Arc::new(registry), ConcurrencyGate::new(4));
//! let request = SynthesisRequest::new("Hello from Rust!", "EN", "EN-US");
//! if let SynthesisOutput::Persisted(file) =
//!     dispatcher.synthesize(&request, OutputMode::Persisted, None).await?
//! {
//!     println!("wrote {} bytes to {}", file.len(), file.path().display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod hparams;
pub mod language;
pub mod model;
pub mod registry;
pub mod resolve;
pub mod speakers;

// Remote fetchers are desktop-only, like the hf-hub / reqwest dependencies.
#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod download;

#[cfg(feature = "server")]
pub mod server;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use dispatch::{OutputMode, RequestDispatcher, SynthesisOutput, SynthesisRequest};
pub use error::{DispatchError, ResolutionError, SynthesisError, ValidationError};
pub use language::{ArtifactKind, LanguageCode};
pub use registry::ModelRegistry;
