//! Request validation, gated synthesis and output delivery.
//!
//! Validation runs in a fixed order and stops at the first failure: language,
//! then speaker, then numeric parameters.  Only a fully valid request waits
//! for a [`ConcurrencyGate`] slot, and the slot is held by the blocking
//! synthesis task itself: it is released when the backend returns, whether
//! the caller is still listening or not.

use std::{
    io::{self, Write},
    ops::RangeInclusive,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use anyhow::anyhow;
use bytes::Bytes;
use serde::Deserialize;
use tempfile::TempPath;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

use crate::{
    backend::{BackendRequest, ProgressEvent, ProgressSink, ShapingParams},
    error::{DispatchError, SynthesisError, ValidationError},
    gate::ConcurrencyGate,
    language::LanguageCode,
    model::ModelHandle,
    registry::ModelRegistry,
    speakers::SpeakerIndex,
};

pub const SPEED_RANGE: RangeInclusive<f32> = 0.1..=10.0;
pub const SDP_RATIO_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const NOISE_SCALE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const NOISE_SCALE_W_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Chunks buffered between a streaming backend and a slow reader.
const STREAM_QUEUE: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Request / output types
// ─────────────────────────────────────────────────────────────────────────────

/// A synthesis request as received from a caller, not yet validated.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speaker", alias = "speakerId", alias = "speaker")]
    pub speaker_id: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub sdp_ratio: Option<f32>,
    #[serde(default)]
    pub noise_scale: Option<f32>,
    #[serde(default)]
    pub noise_scale_w: Option<f32>,
}

fn default_language() -> String {
    "EN".to_string()
}

fn default_speaker() -> String {
    "EN-US".to_string()
}

fn default_speed() -> f32 {
    1.0
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, language: impl Into<String>, speaker_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            speaker_id: speaker_id.into(),
            speed: default_speed(),
            sdp_ratio: None,
            noise_scale: None,
            noise_scale_w: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_shaping(mut self, sdp_ratio: f32, noise_scale: f32, noise_scale_w: f32) -> Self {
        self.sdp_ratio = Some(sdp_ratio);
        self.noise_scale = Some(noise_scale);
        self.noise_scale_w = Some(noise_scale_w);
        self
    }
}

/// How the caller wants the audio delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Complete byte sequence in memory.
    #[serde(alias = "buffer", alias = "bytes")]
    Buffered,
    /// A non-empty temporary WAV file.
    #[default]
    #[serde(alias = "file")]
    Persisted,
    /// Incremental chunks.
    #[serde(alias = "stream")]
    Streamed,
}

pub enum SynthesisOutput {
    Buffered(Bytes),
    Persisted(PersistedAudio),
    Streamed(AudioStream),
}

impl std::fmt::Debug for SynthesisOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(b) => f.debug_tuple("Buffered").field(&b.len()).finish(),
            Self::Persisted(p) => f.debug_tuple("Persisted").field(p).finish(),
            Self::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

/// Synthesised audio on disk.  The file is removed when this is dropped,
/// unless [`PersistedAudio::keep`] is called.
#[derive(Debug)]
pub struct PersistedAudio {
    path: TempPath,
    len: u64,
}

impl PersistedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes; always greater than zero.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Detach the file from automatic cleanup and return its path.
    pub fn keep(self) -> io::Result<PathBuf> {
        self.path.keep().map_err(|e| e.error)
    }
}

/// Audio delivered chunk by chunk.  A failure after the first chunk arrives
/// as an `Err` item and ends the stream.
pub struct AudioStream {
    first: Option<Bytes>,
    rest: ReceiverStream<Result<Bytes, SynthesisError>>,
}

impl AudioStream {
    /// Drain the stream into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, SynthesisError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for AudioStream {
    type Item = Result<Bytes, SynthesisError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        Pin::new(&mut self.rest).poll_next(cx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// A request that passed validation, ready for the backend.
struct Job {
    handle: Arc<ModelHandle>,
    text: String,
    speaker: SpeakerIndex,
    speed: f32,
    shaping: ShapingParams,
}

impl Job {
    fn backend_request(&self) -> BackendRequest<'_> {
        BackendRequest { text: &self.text, speaker: self.speaker, speed: self.speed, shaping: self.shaping }
    }

    fn backend_failure(&self, source: anyhow::Error) -> SynthesisError {
        SynthesisError::BackendFailure { language: self.handle.language().clone(), source: source.into() }
    }

    fn empty_output(&self) -> SynthesisError {
        SynthesisError::EmptyOutput { language: self.handle.language().clone() }
    }
}

#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<ModelRegistry>,
    gate: ConcurrencyGate,
    output_dir: Option<PathBuf>,
}

impl RequestDispatcher {
    pub fn new(registry: Arc<ModelRegistry>, gate: ConcurrencyGate) -> Self {
        Self { registry, gate, output_dir: None }
    }

    /// Directory for persisted output (system temp dir when unset).
    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Validate, wait for a slot, synthesise and deliver in `mode`.
    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
        mode: OutputMode,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<SynthesisOutput, DispatchError> {
        let job = self.validate(request)?;
        tracing::debug!(
            language = %job.handle.language(),
            speaker = %request.speaker_id,
            chars = job.text.chars().count(),
            ?mode,
            "synthesis accepted"
        );
        let output = match mode {
            OutputMode::Buffered => SynthesisOutput::Buffered(Bytes::from(self.run(job, progress).await?)),
            OutputMode::Persisted => {
                let language = job.handle.language().clone();
                let audio = self.run(job, progress).await?;
                SynthesisOutput::Persisted(self.persist(language, audio).await?)
            }
            OutputMode::Streamed => SynthesisOutput::Streamed(self.run_streamed(job, progress).await?),
        };
        Ok(output)
    }

    fn validate(&self, request: &SynthesisRequest) -> Result<Job, ValidationError> {
        // a. language
        let handle = LanguageCode::parse(&request.language)
            .ok()
            .and_then(|code| self.registry.lookup(&code))
            .ok_or_else(|| ValidationError::UnknownLanguage {
                requested: request.language.clone(),
                available: self.registry.list(),
            })?;

        // b. speaker
        let speaker = handle.speakers().index_of(&request.speaker_id).ok_or_else(|| {
            ValidationError::UnknownSpeaker {
                language: handle.language().clone(),
                speaker: request.speaker_id.clone(),
                available: handle.speakers().names().to_vec(),
            }
        })?;

        // c. parameters
        if request.text.trim().is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "text",
                reason: "must not be empty".to_string(),
            });
        }
        let defaults = ShapingParams::default();
        let speed = in_range("speed", request.speed, SPEED_RANGE)?;
        let shaping = ShapingParams {
            sdp_ratio: in_range("sdp_ratio", request.sdp_ratio.unwrap_or(defaults.sdp_ratio), SDP_RATIO_RANGE)?,
            noise_scale: in_range(
                "noise_scale",
                request.noise_scale.unwrap_or(defaults.noise_scale),
                NOISE_SCALE_RANGE,
            )?,
            noise_scale_w: in_range(
                "noise_scale_w",
                request.noise_scale_w.unwrap_or(defaults.noise_scale_w),
                NOISE_SCALE_W_RANGE,
            )?,
        };

        Ok(Job { handle: Arc::clone(handle), text: request.text.clone(), speaker, speed, shaping })
    }

    /// Synthesise into one buffer on the blocking pool, holding a gate slot.
    async fn run(&self, job: Job, progress: Option<Arc<dyn ProgressSink>>) -> Result<Vec<u8>, SynthesisError> {
        report(&progress, ProgressEvent::Queued);
        let token = self.gate.acquire().await;
        report(&progress, ProgressEvent::Started);

        let language = job.handle.language().clone();
        let task = tokio::task::spawn_blocking(move || {
            let _token = token;
            let result = catch_unwind(AssertUnwindSafe(|| {
                job.handle.backend().synthesize(&job.backend_request(), progress.as_deref())
            }))
            .unwrap_or_else(|_| Err(anyhow!("synthesis backend panicked")));
            (result, progress)
        });
        let failure = |source: anyhow::Error| SynthesisError::BackendFailure {
            language: language.clone(),
            source: source.into(),
        };
        let (result, progress) =
            task.await.map_err(|e| failure(anyhow!("synthesis task did not complete: {e}")))?;

        let audio = result.map_err(failure)?;
        if audio.is_empty() {
            tracing::error!(%language, "backend returned no audio");
            return Err(SynthesisError::EmptyOutput { language });
        }
        report(&progress, ProgressEvent::Finished);
        Ok(audio)
    }

    /// Stream chunks from the blocking pool through a bounded channel.
    ///
    /// Waits for the first chunk so failures before any audio exists are
    /// reported as errors rather than as a broken stream.
    async fn run_streamed(
        &self,
        job: Job,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<AudioStream, SynthesisError> {
        report(&progress, ProgressEvent::Queued);
        let token = self.gate.acquire().await;
        report(&progress, ProgressEvent::Started);

        let language = job.handle.language().clone();
        let (tx, mut rx) = mpsc::channel::<Result<Bytes, SynthesisError>>(STREAM_QUEUE);
        tokio::task::spawn_blocking(move || {
            let mut emitted = false;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                job.handle.backend().synthesize_chunked(
                    &job.backend_request(),
                    progress.as_deref(),
                    &mut |chunk: Bytes| {
                        if chunk.is_empty() {
                            return true;
                        }
                        emitted = true;
                        // A send error means the reader is gone: stop producing.
                        tx.blocking_send(Ok(chunk)).is_ok()
                    },
                )
            }));
            let failure = match outcome {
                Ok(Ok(())) if emitted => None,
                Ok(Ok(())) => Some(job.empty_output()),
                Ok(Err(e)) => Some(job.backend_failure(e)),
                Err(_) => Some(job.backend_failure(anyhow!("synthesis backend panicked"))),
            };
            // The slot is free before the reader can observe the end of the stream.
            drop(token);
            match failure {
                Some(err) => {
                    tracing::error!(language = %job.handle.language(), error = %err, "streamed synthesis failed");
                    let _ = tx.blocking_send(Err(err));
                }
                None => report(&progress, ProgressEvent::Finished),
            }
        });

        match rx.recv().await {
            Some(Ok(first)) => Ok(AudioStream { first: Some(first), rest: ReceiverStream::new(rx) }),
            Some(Err(err)) => Err(err),
            None => Err(SynthesisError::BackendFailure {
                language,
                source: anyhow!("synthesis task ended without a result").into(),
            }),
        }
    }

    async fn persist(&self, language: LanguageCode, audio: Vec<u8>) -> Result<PersistedAudio, SynthesisError> {
        let dir = self.output_dir.clone();
        let persisted = tokio::task::spawn_blocking(move || write_temp_wav(&audio, dir.as_deref()))
            .await
            .map_err(|e| SynthesisError::Output(io::Error::other(e.to_string())))?
            .map_err(SynthesisError::Output)?;
        if persisted.len == 0 {
            tracing::error!(%language, path = %persisted.path.display(), "output file is empty");
            return Err(SynthesisError::EmptyOutput { language });
        }
        tracing::info!(%language, path = %persisted.path.display(), size = persisted.len, "audio written");
        Ok(persisted)
    }
}

fn report(progress: &Option<Arc<dyn ProgressSink>>, event: ProgressEvent) {
    if let Some(sink) = progress {
        sink.report(event);
    }
}

fn in_range(name: &'static str, value: f32, range: RangeInclusive<f32>) -> Result<f32, ValidationError> {
    if value.is_finite() && range.contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::InvalidParameter {
            name,
            reason: format!("{value} is outside {}..={}", range.start(), range.end()),
        })
    }
}

/// Write, flush to disk and measure a new temporary `.wav` file.
fn write_temp_wav(audio: &[u8], dir: Option<&Path>) -> io::Result<PersistedAudio> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("melotts-").suffix(".wav");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(audio)?;
    file.as_file().sync_all()?;
    let len = file.as_file().metadata()?.len();
    Ok(PersistedAudio { path: file.into_temp_path(), len })
}
