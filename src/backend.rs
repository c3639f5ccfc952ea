//! Synthesis backend seam.
//!
//! The neural forward pass and vocoder live outside this crate.  A
//! [`BackendLoader`] turns resolved artifacts into a [`SynthesisBackend`]; the
//! backend turns `(text, speaker, speed, shaping)` into WAV bytes.
//!
//! [`ProcessLoader`] is the bridge shipped with the crate: every call runs an
//! external command that receives the text on stdin and writes a WAV to stdout.

use std::{
    fmt,
    io::{self, BufRead, BufReader, Cursor, Read, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use crate::{hparams::ModelConfig, language::LanguageCode, speakers::SpeakerIndex};

/// Size of the slices a buffered result is cut into when streamed.
pub const STREAM_CHUNK_BYTES: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Request / progress
// ─────────────────────────────────────────────────────────────────────────────

/// Model-specific shaping parameters, already range-checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapingParams {
    /// Stochastic vs. deterministic duration predictor mix.
    pub sdp_ratio: f32,
    pub noise_scale: f32,
    /// Noise scale of the duration predictor.
    pub noise_scale_w: f32,
}

impl Default for ShapingParams {
    fn default() -> Self {
        Self { sdp_ratio: 0.2, noise_scale: 0.6, noise_scale_w: 0.8 }
    }
}

/// One validated synthesis call.
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub text: &'a str,
    pub speaker: SpeakerIndex,
    pub speed: f32,
    pub shaping: ShapingParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Waiting for a concurrency slot.
    Queued,
    /// A slot was acquired and the backend was invoked.
    Started,
    /// Backend-reported progress, passed through uninterpreted.
    Advanced { completed: usize, total: usize },
    Finished,
}

/// Receiver of progress events.  Must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend traits
// ─────────────────────────────────────────────────────────────────────────────

pub trait SynthesisBackend: Send + Sync {
    /// Synthesise the whole utterance and return the WAV container bytes.
    fn synthesize(
        &self,
        request: &BackendRequest<'_>,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Vec<u8>>;

    /// Hand the output to `emit` piece by piece.  `emit` returns `false` once
    /// the receiver is gone; the backend should stop early.
    ///
    /// The default synthesises atomically and slices the single buffer without
    /// copying it.
    fn synthesize_chunked(
        &self,
        request: &BackendRequest<'_>,
        progress: Option<&dyn ProgressSink>,
        emit: &mut dyn FnMut(Bytes) -> bool,
    ) -> Result<()> {
        let audio = Bytes::from(self.synthesize(request, progress)?);
        let mut offset = 0;
        while offset < audio.len() {
            let end = (offset + STREAM_CHUNK_BYTES).min(audio.len());
            if !emit(audio.slice(offset..end)) {
                break;
            }
            offset = end;
        }
        Ok(())
    }
}

/// Compute device handed to the backend loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda(u32),
    Mps,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "mps" => Ok(Self::Mps),
            "cuda" => Ok(Self::Cuda(0)),
            _ => match s.strip_prefix("cuda:").map(str::parse::<u32>) {
                Some(Ok(n)) => Ok(Self::Cuda(n)),
                _ => Err(format!("unknown device '{s}' (expected auto, cpu, mps, cuda or cuda:N)")),
            },
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
            Self::Mps => f.write_str("mps"),
            Self::Cuda(n) => write!(f, "cuda:{n}"),
        }
    }
}

/// Everything a loader needs to construct one language's backend.
pub struct LoadSpec<'a> {
    pub language: &'a LanguageCode,
    pub config: &'a ModelConfig,
    pub config_path: &'a Path,
    pub checkpoint_path: &'a Path,
    pub device: Device,
}

pub trait BackendLoader: Send + Sync {
    fn load(&self, spec: &LoadSpec<'_>) -> Result<Box<dyn SynthesisBackend>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// External process bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Loads a [`ProcessBackend`] per language.
///
/// The command is invoked as
///
/// ```text
/// <program> <args…> --language EN --config <path> --checkpoint <path> --device cpu
///           --speaker-id 0 --speed 1.0 --sdp-ratio 0.2 --noise-scale 0.6 --noise-scale-w 0.8
/// ```
///
/// with the text on stdin.  It must write one WAV file to stdout and exit 0.
/// Lines `progress <done> <total>` on stderr are forwarded as progress.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLoader {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl BackendLoader for ProcessLoader {
    fn load(&self, spec: &LoadSpec<'_>) -> Result<Box<dyn SynthesisBackend>> {
        if !spec.checkpoint_path.is_file() {
            bail!("checkpoint {} is not a file", spec.checkpoint_path.display());
        }
        let mut args = self.args.clone();
        args.extend([
            "--language".to_string(),
            spec.language.to_string(),
            "--config".to_string(),
            spec.config_path.display().to_string(),
            "--checkpoint".to_string(),
            spec.checkpoint_path.display().to_string(),
            "--device".to_string(),
            spec.device.to_string(),
        ]);
        Ok(Box::new(ProcessBackend {
            program: self.program.clone(),
            args,
            sample_rate: spec.config.sampling_rate(),
        }))
    }
}

pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    sample_rate: u32,
}

impl SynthesisBackend for ProcessBackend {
    fn synthesize(
        &self,
        request: &BackendRequest<'_>,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args([
                "--speaker-id".to_string(),
                request.speaker.get().to_string(),
                "--speed".to_string(),
                request.speed.to_string(),
                "--sdp-ratio".to_string(),
                request.shaping.sdp_ratio.to_string(),
                "--noise-scale".to_string(),
                request.shaping.noise_scale.to_string(),
                "--noise-scale-w".to_string(),
                request.shaping.noise_scale_w.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Cannot start backend {}", self.program.display()))?;

        let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            bail!("backend pipes unavailable");
        };

        let mut audio = Vec::new();
        let mut diagnostics = Vec::new();
        std::thread::scope(|s| -> Result<()> {
            let writer = s.spawn(move || stdin.write_all(request.text.as_bytes()));
            let reader = s.spawn(|| {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    match parse_progress(&line) {
                        Some((completed, total)) => {
                            if let Some(sink) = progress {
                                sink.report(ProgressEvent::Advanced { completed, total });
                            }
                        }
                        None => diagnostics.push(line),
                    }
                }
            });
            // Killing on failure closes the child's pipes so both threads finish.
            let read = reap_on_error(&mut child, stdout.read_to_end(&mut audio));
            // A backend may exit without consuming stdin; that surfaces as a
            // broken pipe here and is judged by the exit status instead.
            let _ = writer.join();
            let _ = reader.join();
            read.map(drop)
        })?;

        let status = child.wait().context("Failed waiting for backend")?;
        if !status.success() {
            bail!("backend exited with {}: {}", status, diagnostics.join(" | "));
        }
        for line in &diagnostics {
            tracing::debug!(backend = %self.program.display(), "{line}");
        }
        check_wav(&audio, self.sample_rate)?;
        if wav_frames(&audio) == 0 {
            // header only: report as no audio at all
            return Ok(Vec::new());
        }
        Ok(audio)
    }
}

/// Kill and reap `child` when reading its output failed.
fn reap_on_error<T>(child: &mut Child, read: io::Result<T>) -> Result<T> {
    if read.is_err() {
        let _ = child.kill();
        let _ = child.wait();
    }
    read.context("Failed reading backend output")
}

fn parse_progress(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "progress" {
        return None;
    }
    let completed = parts.next()?.parse().ok()?;
    let total = parts.next()?.parse().ok()?;
    Some((completed, total))
}

/// Reject anything but a WAV at the model's sample rate.
fn check_wav(audio: &[u8], expected_rate: u32) -> Result<()> {
    if audio.is_empty() {
        return Ok(());
    }
    let reader = hound::WavReader::new(Cursor::new(audio)).context("backend output is not a WAV file")?;
    let spec = reader.spec();
    if spec.sample_rate != expected_rate {
        bail!(
            "backend produced {} Hz audio, model is configured for {} Hz",
            spec.sample_rate,
            expected_rate
        );
    }
    Ok(())
}

/// Number of audio frames in a WAV buffer (0 for an empty or unreadable buffer).
pub fn wav_frames(audio: &[u8]) -> u32 {
    hound::WavReader::new(Cursor::new(audio)).map(|r| r.duration()).unwrap_or(0)
}
