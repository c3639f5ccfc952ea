//! Shared fixtures: a scriptable fake backend and an offline model layout writer.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use melotts_serve::{
    backend::{BackendLoader, BackendRequest, LoadSpec, ProgressEvent, ProgressSink, SynthesisBackend},
    language::{ArtifactKind, LanguageCode},
    resolve::offline_path,
};

pub const SAMPLE_RATE: u32 = 44_100;

pub fn lang(s: &str) -> LanguageCode {
    LanguageCode::parse(s).unwrap()
}

/// A short mono 16-bit WAV at [`SAMPLE_RATE`].
pub fn wav(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Cursor::new(Vec::new());
    let mut w = hound::WavWriter::new(&mut buf, spec).unwrap();
    for i in 0..samples {
        w.write_sample(((i * 37) % 2000) as i16).unwrap();
    }
    w.finalize().unwrap();
    buf.into_inner()
}

/// Write `config.json` and `checkpoint.pth` for `language` under the offline root.
pub fn install(root: &Path, language: &str, spk2id: &str) {
    let l = lang(language);
    let cfg = offline_path(root, &l, ArtifactKind::Config);
    let ckpt = offline_path(root, &l, ArtifactKind::Checkpoint);
    std::fs::create_dir_all(cfg.parent().unwrap()).unwrap();
    std::fs::create_dir_all(ckpt.parent().unwrap()).unwrap();
    let body = format!(
        r#"{{"data": {{"sampling_rate": {SAMPLE_RATE}, "add_blank": true, "spk2id": {spk2id}}}, "num_tones": 16}}"#
    );
    std::fs::write(cfg, body).unwrap();
    std::fs::write(ckpt, b"not really weights").unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake backend
// ─────────────────────────────────────────────────────────────────────────────

/// What a fake backend does when asked to synthesise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Wav,
    Empty,
    Fail,
    Panic,
}

/// Counters shared by every backend a [`FakeLoader`] creates.
#[derive(Debug, Default)]
pub struct Stats {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Stats {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    behaviour: Behaviour,
    delay: Duration,
    stats: Arc<Stats>,
}

impl SynthesisBackend for FakeBackend {
    fn synthesize(&self, request: &BackendRequest<'_>, progress: Option<&dyn ProgressSink>) -> Result<Vec<u8>> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(sink) = progress {
            sink.report(ProgressEvent::Advanced { completed: 0, total: 1 });
        }
        std::thread::sleep(self.delay);
        if let Some(sink) = progress {
            sink.report(ProgressEvent::Advanced { completed: 1, total: 1 });
        }

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Wav => Ok(wav(request.text.chars().count() * 100)),
            Behaviour::Empty => Ok(Vec::new()),
            Behaviour::Fail => bail!("CUDA out of memory"),
            Behaviour::Panic => panic!("index out of bounds in the duration predictor"),
        }
    }
}

/// Hands out [`FakeBackend`]s; behaviour per language, [`Behaviour::Wav`] otherwise.
#[derive(Default)]
pub struct FakeLoader {
    pub stats: Arc<Stats>,
    behaviours: HashMap<String, Behaviour>,
    delay: Duration,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, language: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(language.to_string(), behaviour);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl BackendLoader for FakeLoader {
    fn load(&self, spec: &LoadSpec<'_>) -> Result<Box<dyn SynthesisBackend>> {
        assert!(spec.checkpoint_path.is_file());
        let behaviour = self.behaviours.get(spec.language.as_str()).copied().unwrap_or(Behaviour::Wav);
        Ok(Box::new(FakeBackend { behaviour, delay: self.delay, stats: Arc::clone(&self.stats) }))
    }
}
