//! melotts-server: multi-language MeloTTS over HTTP.
//!
//! Usage:
//!   melotts-server serve --backend-cmd melo-synth --languages EN,ZH
//!   MELOTTTS_MODELS=/srv/melo melotts-server serve --backend-cmd melo-synth
//!   melotts-server fetch --remote url --pretrained
//!   melotts-server fetch --bert
//!
//! Endpoints (all under `/api`):
//!   GET  /api/ping
//!   GET  /api/health
//!   GET  /api/languages
//!   GET  /api/languages/{language}/speakers
//!   POST /api/convert/tts?output=file|buffer|stream

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use melotts_serve::{
    backend::{Device, ProcessLoader},
    config::{parse_language_path, parse_languages, ServiceConfig, OFFLINE_ROOT_ENV},
    gate::{ConcurrencyGate, DEFAULT_CONCURRENCY},
    language::{ArtifactKind, LanguageCode},
    registry::ModelRegistry,
    resolve::{Provenance, RemoteMode},
    server, RequestDispatcher,
};

#[derive(Debug, Parser)]
#[command(name = "melotts-server", version, about = "Serve MeloTTS models for several languages over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load every configured language and serve the HTTP API.
    Serve(ServeArgs),
    /// Resolve (and download) artifacts for every configured language, then exit.
    Fetch(FetchArgs),
}

/// Where models come from; shared by both subcommands.
#[derive(Debug, Args)]
struct ModelArgs {
    /// Languages to serve, comma separated, in listing order.
    #[arg(long, env = "MELOTTS_LANGUAGES", default_value = "EN,ES,FR,ZH,JP,KR")]
    languages: String,

    /// Explicit config path for one language (repeatable).
    #[arg(long = "config", value_name = "LANG=PATH", value_parser = parse_language_path)]
    config_paths: Vec<(LanguageCode, PathBuf)>,

    /// Explicit checkpoint path for one language (repeatable).
    #[arg(long = "checkpoint", value_name = "LANG=PATH", value_parser = parse_language_path)]
    checkpoint_paths: Vec<(LanguageCode, PathBuf)>,

    /// Offline model root (`<root>/models/<LANG>/{config,model}/…`).
    /// When set, remote sources are never consulted.
    #[arg(long, env = OFFLINE_ROOT_ENV)]
    offline_root: Option<PathBuf>,

    /// Remote source after the local ones: hub, url or none.
    #[arg(long, env = "MELOTTS_REMOTE", default_value = "hub")]
    remote: RemoteMode,

    /// Download cache directory.
    #[arg(long, env = "MELOTTS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Compute device handed to the backend: auto, cpu, cuda, cuda:N or mps.
    #[arg(long, env = "MELOTTS_DEVICE", default_value = "auto")]
    device: Device,
}

impl ModelArgs {
    fn into_config(self) -> Result<ServiceConfig> {
        Ok(ServiceConfig {
            languages: parse_languages(&self.languages)?,
            config_paths: self.config_paths.into_iter().collect(),
            checkpoint_paths: self.checkpoint_paths.into_iter().collect(),
            offline_root: self.offline_root,
            remote: self.remote,
            cache_dir: self.cache_dir,
            device: self.device,
            ..ServiceConfig::default()
        })
    }
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    models: ModelArgs,

    #[arg(long, env = "MELOTTS_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(long, short, env = "MELOTTS_PORT", default_value_t = 7860)]
    port: u16,

    /// Synthesis calls allowed to run at once, across all languages.
    #[arg(long, env = "MELOTTS_MAX_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    max_concurrency: usize,

    /// Directory for persisted output files (system temp dir by default).
    #[arg(long, env = "MELOTTS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Synthesis command run per request (WAV on stdout, text on stdin).
    #[arg(long, env = "MELOTTS_BACKEND_CMD")]
    backend_cmd: PathBuf,

    /// Extra leading argument for the synthesis command (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    backend_arg: Vec<String>,
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[command(flatten)]
    models: ModelArgs,

    /// Also fetch the shared pretrained components (G.pth, D.pth, DUR.pth).
    #[arg(long)]
    pretrained: bool,

    /// Also fetch the per-language BERT text encoders from the hub.
    #[arg(long)]
    bert: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Fetch(args) => fetch(args).await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serve
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(args: ServeArgs) -> Result<()> {
    let config = ServiceConfig {
        max_concurrency: args.max_concurrency,
        output_dir: args.output_dir,
        ..args.models.into_config()?
    };
    config.validate()?;

    let loader = ProcessLoader::new(args.backend_cmd, args.backend_arg);
    let build_config = config.clone();
    // Resolution may download; keep it off the async workers.
    let registry = tokio::task::spawn_blocking(move || -> Result<ModelRegistry> {
        let resolver = build_config.build_resolver()?;
        Ok(ModelRegistry::build(&build_config.language_specs(), build_config.device, &resolver, &loader))
    })
    .await
    .context("model loading task failed")??;

    if registry.is_empty() {
        bail!("none of the configured languages could be loaded");
    }
    tracing::info!(
        languages = ?registry.list(),
        dropped = registry.dropped().len(),
        max_concurrency = config.max_concurrency,
        "models ready"
    );

    let dispatcher = RequestDispatcher::new(Arc::new(registry), ConcurrencyGate::new(config.max_concurrency))
        .with_output_dir(config.output_dir.clone());
    let app = server::router(dispatcher);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received, draining connections");
}

// ─────────────────────────────────────────────────────────────────────────────
// fetch
// ─────────────────────────────────────────────────────────────────────────────

async fn fetch(args: FetchArgs) -> Result<()> {
    let config = args.models.into_config()?;
    config.validate()?;
    let (pretrained, bert) = (args.pretrained, args.bert);

    tokio::task::spawn_blocking(move || -> Result<()> {
        let resolver = config.build_resolver()?;
        let mut failed = 0usize;
        for spec in config.language_specs() {
            for (kind, explicit) in [
                (ArtifactKind::Config, spec.config_path.as_deref()),
                (ArtifactKind::Checkpoint, spec.checkpoint_path.as_deref()),
            ] {
                match resolver.resolve(&spec.language, kind, explicit) {
                    Ok(artifact) => println!(
                        "{:<9} {:<10} {:<13} {}",
                        spec.language,
                        kind,
                        artifact.provenance,
                        artifact.path.display()
                    ),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{:<9} {:<10} FAILED        {e}", spec.language, kind);
                    }
                }
            }
        }

        if pretrained {
            for path in resolver.fetch_pretrained()? {
                println!("{:<9} {:<10} {:<13} {}", "-", "pretrained", Provenance::UrlCache, path.display());
            }
        }

        if bert {
            for (_, paths) in resolver.fetch_bert(&config.languages)? {
                for path in paths {
                    println!("{:<9} {:<10} {:<13} {}", "-", "bert", Provenance::Hub, path.display());
                }
            }
        }

        if failed > 0 {
            bail!("{failed} artifact(s) could not be resolved");
        }
        Ok(())
    })
    .await
    .context("fetch task failed")?
}
