//! End-to-end: offline artifacts → registry → dispatcher, with a fake backend.

mod common;

use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{install, lang, Behaviour, FakeLoader};
use melotts_serve::{
    backend::{Device, ProgressEvent, ProgressSink},
    gate::ConcurrencyGate,
    registry::{LanguageSpec, ModelRegistry},
    resolve::{Provenance, ResourceResolver},
    DispatchError, OutputMode, RequestDispatcher, SynthesisError, SynthesisOutput, SynthesisRequest,
    ValidationError,
};

struct Service {
    dispatcher: RequestDispatcher,
    loader_stats: Arc<common::Stats>,
    _root: tempfile::TempDir,
    _out: tempfile::TempDir,
}

fn service(loader: FakeLoader, limit: usize) -> Service {
    let root = tempfile::tempdir().unwrap();
    install(root.path(), "EN", r#"{"EN-US": 0, "EN-BR": 1, "EN_INDIA": 2, "EN-AU": 3, "EN-Default": 4}"#);
    install(root.path(), "ZH", r#"{"ZH": 1}"#);
    install(root.path(), "JP", r#"{"JP": 0}"#);
    let out = tempfile::tempdir().unwrap();

    let resolver = ResourceResolver::local_only().with_offline_root(Some(root.path().into()));
    let specs: Vec<LanguageSpec> = ["EN", "ZH", "JP"].iter().map(|l| LanguageSpec::new(lang(l))).collect();
    let stats = Arc::clone(&loader.stats);
    let registry = ModelRegistry::build(&specs, Device::Cpu, &resolver, &loader);
    assert_eq!(registry.len(), 3);

    let dispatcher = RequestDispatcher::new(Arc::new(registry), ConcurrencyGate::new(limit))
        .with_output_dir(Some(out.path().into()));
    Service { dispatcher, loader_stats: stats, _root: root, _out: out }
}

fn hello(language: &str, speaker: &str) -> SynthesisRequest {
    SynthesisRequest::new("Hello", language, speaker)
}

// ─────────────────────────────────────────────────────────────────────────────
// Happy paths
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hello_en_us_produces_audio() {
    let svc = service(FakeLoader::new(), 4);
    let out = svc.dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await.unwrap();
    let SynthesisOutput::Buffered(audio) = out else { panic!("expected buffered output") };
    assert!(!audio.is_empty());

    let reader = hound::WavReader::new(Cursor::new(audio.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, common::SAMPLE_RATE);
    assert_eq!(reader.duration(), 500);
    assert_eq!(svc.loader_stats.calls(), 1);
}

#[tokio::test]
async fn test_handles_record_offline_provenance() {
    let svc = service(FakeLoader::new(), 4);
    let handle = svc.dispatcher.registry().lookup(&lang("ZH")).unwrap();
    let (config, checkpoint) = handle.artifacts().unwrap();
    assert_eq!(config.provenance, Provenance::OfflineLocal);
    assert_eq!(checkpoint.provenance, Provenance::OfflineLocal);
    assert!(checkpoint.path.ends_with("models/ZH/model/checkpoint.pth"));
}

#[tokio::test]
async fn test_persisted_output_is_a_non_empty_file() {
    let svc = service(FakeLoader::new(), 4);
    let req = SynthesisRequest::new("Bonjour tout le monde", "en-us", "EN-BR").with_speed(1.3);
    let out = svc.dispatcher.synthesize(&req, OutputMode::Persisted, None).await.unwrap();
    let SynthesisOutput::Persisted(file) = out else { panic!("expected persisted output") };

    assert!(file.len() > 0);
    let on_disk = std::fs::read(file.path()).unwrap();
    assert_eq!(on_disk.len() as u64, file.len());
    assert!(file.path().starts_with(svc._out.path()));

    let path = file.path().to_path_buf();
    drop(file);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_streamed_output_matches_buffered() {
    let svc = service(FakeLoader::new(), 4);
    let req = SynthesisRequest::new("x".repeat(700), "JP", "JP");

    let SynthesisOutput::Streamed(stream) =
        svc.dispatcher.synthesize(&req, OutputMode::Streamed, None).await.unwrap()
    else {
        panic!("expected streamed output")
    };
    let streamed = stream.collect_bytes().await.unwrap();

    let SynthesisOutput::Buffered(buffered) =
        svc.dispatcher.synthesize(&req, OutputMode::Buffered, None).await.unwrap()
    else {
        panic!("expected buffered output")
    };
    assert_eq!(streamed, buffered.to_vec());
    assert!(streamed.len() > melotts_serve::backend::STREAM_CHUNK_BYTES);
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let svc = service(FakeLoader::new(), 4);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<dyn ProgressSink> = {
        let events = Arc::clone(&events);
        Arc::new(move |e: ProgressEvent| events.lock().unwrap().push(e))
    };
    svc.dispatcher.synthesize(&hello("EN", "EN-AU"), OutputMode::Buffered, Some(sink)).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            ProgressEvent::Queued,
            ProgressEvent::Started,
            ProgressEvent::Advanced { completed: 0, total: 1 },
            ProgressEvent::Advanced { completed: 1, total: 1 },
            ProgressEvent::Finished,
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_speaker_never_reaches_backend() {
    let svc = service(FakeLoader::new(), 4);
    let err = svc.dispatcher.synthesize(&hello("EN", "XX-BOGUS"), OutputMode::Buffered, None).await.unwrap_err();
    match err {
        DispatchError::Validation(ValidationError::UnknownSpeaker { language, speaker, available }) => {
            assert_eq!(language, lang("EN"));
            assert_eq!(speaker, "XX-BOGUS");
            assert_eq!(available[0], "EN-US");
            assert_eq!(available.len(), 5);
        }
        other => panic!("expected UnknownSpeaker, got {other:?}"),
    }
    assert_eq!(svc.loader_stats.calls(), 0);
}

#[tokio::test]
async fn test_speaker_of_other_language_is_rejected() {
    let svc = service(FakeLoader::new(), 4);
    let err = svc.dispatcher.synthesize(&hello("ZH", "EN-US"), OutputMode::Buffered, None).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_speaker");
    assert_eq!(svc.loader_stats.calls(), 0);
}

#[tokio::test]
async fn test_unknown_language_lists_loaded_ones() {
    let svc = service(FakeLoader::new(), 4);
    let err = svc.dispatcher.synthesize(&hello("FR", "FR"), OutputMode::Buffered, None).await.unwrap_err();
    match err {
        DispatchError::Validation(ValidationError::UnknownLanguage { requested, available }) => {
            assert_eq!(requested, "FR");
            assert_eq!(available, vec![lang("EN"), lang("ZH"), lang("JP")]);
        }
        other => panic!("expected UnknownLanguage, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_order() {
    let svc = service(FakeLoader::new(), 4);

    // Language is checked before parameters.
    let req = SynthesisRequest::new("", "KR", "KR").with_speed(99.0);
    let err = svc.dispatcher.synthesize(&req, OutputMode::Buffered, None).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_language");

    // Speaker before parameters.
    let req = SynthesisRequest::new("", "EN", "nobody");
    let err = svc.dispatcher.synthesize(&req, OutputMode::Buffered, None).await.unwrap_err();
    assert_eq!(err.kind(), "unknown_speaker");
}

#[tokio::test]
async fn test_parameter_ranges() {
    let svc = service(FakeLoader::new(), 4);
    let bad = [
        SynthesisRequest::new(" \n\t", "EN", "EN-US"),
        hello("EN", "EN-US").with_speed(0.0),
        hello("EN", "EN-US").with_speed(f32::NAN),
        hello("EN", "EN-US").with_shaping(1.5, 0.6, 0.8),
        hello("EN", "EN-US").with_shaping(0.2, -0.1, 0.8),
        hello("EN", "EN-US").with_shaping(0.2, 0.6, f32::INFINITY),
    ];
    for req in &bad {
        let err = svc.dispatcher.synthesize(req, OutputMode::Buffered, None).await.unwrap_err();
        assert!(
            matches!(err, DispatchError::Validation(ValidationError::InvalidParameter { .. })),
            "{req:?} → {err:?}"
        );
    }
    assert_eq!(svc.loader_stats.calls(), 0);

    let edge = hello("EN", "EN-US").with_speed(10.0).with_shaping(0.0, 2.0, 0.0);
    assert!(svc.dispatcher.synthesize(&edge, OutputMode::Buffered, None).await.is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_error_is_reported_with_cause() {
    let svc = service(FakeLoader::new().with("ZH", Behaviour::Fail), 2);
    let err = svc.dispatcher.synthesize(&hello("ZH", "ZH"), OutputMode::Buffered, None).await.unwrap_err();
    match &err {
        DispatchError::Synthesis(SynthesisError::BackendFailure { language, source }) => {
            assert_eq!(language, &lang("ZH"));
            assert!(source.to_string().contains("CUDA out of memory"));
        }
        other => panic!("expected BackendFailure, got {other:?}"),
    }
    assert_eq!(svc.dispatcher.gate().outstanding(), 0);

    // Other languages keep working.
    assert!(svc.dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await.is_ok());
}

#[tokio::test]
async fn test_backend_panic_is_a_backend_failure() {
    let svc = service(FakeLoader::new().with("JP", Behaviour::Panic), 1);
    for mode in [OutputMode::Buffered, OutputMode::Streamed] {
        let err = svc.dispatcher.synthesize(&hello("JP", "JP"), mode, None).await.unwrap_err();
        assert_eq!(err.kind(), "backend_failure", "{mode:?}");
    }
    assert_eq!(svc.dispatcher.gate().outstanding(), 0);
    assert!(svc.dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await.is_ok());
}

#[tokio::test]
async fn test_empty_backend_output_is_never_delivered() {
    let svc = service(FakeLoader::new().with("EN", Behaviour::Empty), 4);
    for mode in [OutputMode::Persisted, OutputMode::Buffered, OutputMode::Streamed] {
        let err = svc.dispatcher.synthesize(&hello("EN", "EN-US"), mode, None).await.unwrap_err();
        assert!(
            matches!(err, DispatchError::Synthesis(SynthesisError::EmptyOutput { .. })),
            "{mode:?} → {err:?}"
        );
    }
    let leftovers = std::fs::read_dir(svc._out.path()).unwrap().count();
    assert_eq!(leftovers, 0, "no empty file left behind");
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gate_bounds_concurrent_synthesis() {
    let svc = service(FakeLoader::new().with_delay(Duration::from_millis(60)), 4);
    let languages = ["EN", "ZH", "JP", "EN", "ZH", "JP", "EN"];

    let tasks: Vec<_> = languages
        .iter()
        .map(|&l| {
            let dispatcher = svc.dispatcher.clone();
            let speaker = if l == "EN" { "EN-US" } else { l };
            let req = hello(l, speaker);
            tokio::spawn(async move { dispatcher.synthesize(&req, OutputMode::Buffered, None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(svc.loader_stats.calls(), 7);
    let max = svc.loader_stats.max_active();
    assert!(max <= 4, "at most 4 concurrent backend calls, saw {max}");
    assert!(max >= 2, "calls should overlap, saw {max}");
    assert_eq!(svc.dispatcher.gate().outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_request_releases_slot_when_backend_finishes() {
    let svc = service(FakeLoader::new().with_delay(Duration::from_millis(150)), 1);

    let dispatcher = svc.dispatcher.clone();
    let caller = tokio::spawn(async move {
        dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await
    });
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(svc.dispatcher.gate().outstanding(), 1);
    caller.abort();

    tokio::time::timeout(Duration::from_secs(5), async {
        while svc.dispatcher.gate().outstanding() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot released after the backend returns");
    assert_eq!(svc.loader_stats.calls(), 1);

    // The gate is usable again.
    assert!(svc.dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await.is_ok());
}

#[tokio::test]
async fn test_dropped_stream_releases_slot() {
    use tokio_stream::StreamExt;

    let svc = service(FakeLoader::new(), 1);
    // ~800 KB of audio: more chunks than the stream queue holds.
    let req = SynthesisRequest::new("x".repeat(4000), "EN", "EN-US");
    let SynthesisOutput::Streamed(mut stream) =
        svc.dispatcher.synthesize(&req, OutputMode::Streamed, None).await.unwrap()
    else {
        panic!("expected streamed output")
    };

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), melotts_serve::backend::STREAM_CHUNK_BYTES);

    // The producer is parked on a full queue and still holds the slot.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(svc.dispatcher.gate().outstanding(), 1);

    drop(stream);
    tokio::time::timeout(Duration::from_secs(5), async {
        while svc.dispatcher.gate().outstanding() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("slot released after the reader goes away");

    assert!(svc.dispatcher.synthesize(&hello("EN", "EN-US"), OutputMode::Buffered, None).await.is_ok());
}
