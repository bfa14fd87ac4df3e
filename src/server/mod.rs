use crate::config::Config;
use crate::playback::{start_cleanup_task, PlaybackConfig, PlaybackManager};
use crate::streaming::{self, RepresentationCache};
use crate::transcode::{EncoderLauncher, FfmpegLauncher};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use reelforge_av::{FfprobeInspector, MediaInspector, Prober, Toolchain};
use reelforge_media::RepresentationResolver;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod error;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Cached stream prober
    pub prober: Arc<Prober>,
    /// Representation id to segment layout
    pub resolver: Arc<RepresentationResolver>,
    /// Resolved representations
    pub representations: Arc<RepresentationCache>,
    /// Playback session table
    pub playback: Arc<PlaybackManager>,
}

impl AppContext {
    /// Wire the engine together from its two external collaborators.
    pub fn new(
        config: Config,
        inspector: Arc<dyn MediaInspector>,
        launcher: Arc<dyn EncoderLauncher>,
    ) -> Self {
        let prober = Prober::new(inspector, config.library.root.clone());
        let resolver = RepresentationResolver::new(config.transcode.segment_duration_secs);
        let representations =
            RepresentationCache::new(config.cache.max_entries, config.cache.ttl());
        let playback = PlaybackManager::new(PlaybackConfig::from_config(&config), launcher);

        Self {
            config: Arc::new(config),
            prober: Arc::new(prober),
            resolver: Arc::new(resolver),
            representations: Arc::new(representations),
            playback: Arc::new(playback),
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::RANGE]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/files", streaming::files_router())
        .nest("/internal/transcoder", streaming::transcoder_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let tools = match Toolchain::resolve(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    ) {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!("{}; falling back to PATH names", e);
            Toolchain::from_path_lookup()
        }
    };
    tracing::info!(ffmpeg = %tools.ffmpeg.display(), ffprobe = %tools.ffprobe.display(), "Using tools");

    tokio::fs::create_dir_all(&config.transcode.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {:?}", config.transcode.temp_dir))?;

    let shutdown_timeout = config.transcode.shutdown_timeout();
    let cleanup_interval = config.transcode.cleanup_interval();

    let ctx = AppContext::new(
        config,
        Arc::new(FfprobeInspector::new(&tools.ffprobe)),
        Arc::new(FfmpegLauncher::new(&tools.ffmpeg)),
    );

    let cancel = CancellationToken::new();
    let cleanup_handle = start_cleanup_task(
        Arc::clone(&ctx.playback),
        cleanup_interval,
        cancel.clone(),
    );

    let app = create_router(ctx.clone());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Signal background tasks to stop.
    cancel.cancel();
    if let Err(e) = cleanup_handle.await {
        tracing::warn!("Cleanup task failed: {}", e);
    }

    let summary = ctx.playback.destroy_all(shutdown_timeout).await;
    if summary.leaked > 0 {
        tracing::warn!(leaked = summary.leaked, "Shut down with leaked transcoding sessions");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
