//! HTTP surface over a [`RequestDispatcher`].
//!
//! Every route lives under `/api`.  Errors are returned as JSON bodies of the
//! form `{"error": <kind>, "message": <text>}`.

use std::{error::Error as _, io, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{
        rejection::{FormRejection, JsonRejection, QueryRejection},
        FromRequest, Path, Query, Request, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{io::AsyncReadExt, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    backend::{ProgressEvent, ProgressSink, STREAM_CHUNK_BYTES},
    catalog::sample_text,
    dispatch::{OutputMode, PersistedAudio, RequestDispatcher, SynthesisOutput, SynthesisRequest},
    error::{DispatchError, SynthesisError, ValidationError},
    language::LanguageCode,
    registry::DroppedLanguage,
};

const WAV_MIME: &str = "audio/wav";

/// Chunks of a persisted file buffered ahead of the client.
const FILE_QUEUE: usize = 4;

pub struct AppState {
    dispatcher: RequestDispatcher,
    started: Instant,
}

/// Build the application router.
pub fn router(dispatcher: RequestDispatcher) -> Router {
    let state = Arc::new(AppState { dispatcher, started: Instant::now() });

    let api = Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/languages", get(languages))
        .route("/languages/{language}/speakers", get(speakers))
        .route("/convert/tts", post(convert_tts));

    Router::new()
        .nest("/api", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { status, kind, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match &err {
            DispatchError::Validation(ValidationError::UnknownLanguage { .. }) => StatusCode::NOT_FOUND,
            DispatchError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Synthesis(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut message = err.to_string();
        let mut cause = err.source();
        while let Some(e) = cause {
            message.push_str(": ");
            message.push_str(&e.to_string());
            cause = e.source();
        }
        if err.is_client_error() {
            tracing::debug!(kind = err.kind(), %message, "request rejected");
        } else {
            tracing::error!(kind = err.kind(), %message, "synthesis failed");
        }
        Self::new(status, err.kind(), message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "invalid_body", rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self::new(rejection.status(), "invalid_body", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), "invalid_query", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.kind, "message": self.message }))).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request body: JSON or url-encoded form
// ─────────────────────────────────────────────────────────────────────────────

pub struct TtsBody(pub SynthesisRequest);

impl<S> FromRequest<S> for TtsBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        let request = if is_form {
            Form::<SynthesisRequest>::from_request(req, state).await?.0
        } else {
            Json::<SynthesisRequest>::from_request(req, state).await?.0
        };
        Ok(Self(request))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConvertQuery {
    #[serde(default)]
    output: OutputMode,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "msg": "pong" }))
}

#[derive(Serialize)]
struct GateStatus {
    limit: usize,
    outstanding: usize,
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    languages: Vec<LanguageCode>,
    dropped: &'a [DroppedLanguage],
    gate: GateStatus,
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.dispatcher.registry();
    let gate = state.dispatcher.gate();
    Json(HealthResponse {
        status: if registry.is_empty() { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        languages: registry.list(),
        dropped: registry.dropped(),
        gate: GateStatus { limit: gate.limit(), outstanding: gate.outstanding() },
    })
    .into_response()
}

#[derive(Serialize)]
struct LanguageInfo {
    language: LanguageCode,
    sample_rate: u32,
    speakers: usize,
    sample_text: Option<&'static str>,
}

async fn languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageInfo>> {
    let infos = state
        .dispatcher
        .registry()
        .handles()
        .map(|h| LanguageInfo {
            language: h.language().clone(),
            sample_rate: h.sample_rate(),
            speakers: h.speakers().len(),
            sample_text: sample_text(h.language()),
        })
        .collect();
    Json(infos)
}

#[derive(Serialize)]
struct SpeakersResponse<'a> {
    language: &'a LanguageCode,
    default: &'a str,
    speakers: &'a [String],
}

async fn speakers(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> Result<Response, ApiError> {
    let registry = state.dispatcher.registry();
    let handle = LanguageCode::parse(&language)
        .ok()
        .and_then(|code| registry.lookup(&code))
        .ok_or_else(|| {
            DispatchError::from(ValidationError::UnknownLanguage {
                requested: language.clone(),
                available: registry.list(),
            })
        })?;
    Ok(Json(SpeakersResponse {
        language: handle.language(),
        default: handle.speakers().first_name(),
        speakers: handle.speakers().names(),
    })
    .into_response())
}

async fn convert_tts(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ConvertQuery>, QueryRejection>,
    TtsBody(request): TtsBody,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let progress: Arc<dyn ProgressSink> = Arc::new(|event: ProgressEvent| {
        tracing::trace!(?event, "synthesis progress");
    });

    let output = state.dispatcher.synthesize(&request, query.output, Some(progress)).await?;
    let body = match output {
        SynthesisOutput::Buffered(audio) => Body::from(audio),
        SynthesisOutput::Persisted(file) => {
            let reader = tokio::fs::File::open(file.path())
                .await
                .map_err(|e| DispatchError::from(SynthesisError::Output(e)))?;
            file_body(file, reader)
        }
        SynthesisOutput::Streamed(stream) => Body::from_stream(stream),
    };

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(WAV_MIME));
    if query.output == OutputMode::Persisted {
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"tts.wav\""));
    }
    Ok(response)
}

/// Stream `file` to the client in chunks.  The file is removed from disk once
/// it has been sent or the client has gone away.
fn file_body(file: PersistedAudio, mut reader: tokio::fs::File) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(FILE_QUEUE);
    tokio::spawn(async move {
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(path = %file.path().display(), error = %e, "reading output file failed");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
        drop(reader);
        drop(file);
    });
    Body::from_stream(ReceiverStream::new(rx))
}
