//! Media streaming module.
//!
//! Serves HLS and DASH manifests and the segments behind them, starting
//! encoder runs on demand.
//!
//! # Routes
//!
//! Per file, under `/files/{locator}/{session}`:
//! - `GET hls-manifest.m3u8` - Master playlist, transmux where playable
//! - `GET hls-transmuxing-manifest.m3u8` - Master playlist, transmux only
//! - `GET hls-transcoding-manifest.m3u8` - Master playlist, transcode only
//! - `GET dash-manifest.mpd` - Static MPD
//! - `GET streams` - Probed streams as JSON
//! - `GET {stream}/{representation}/index.m3u8` - Media playlist
//! - `GET {stream}/{representation}/init.mp4` - Init segment
//! - `GET {stream}/{representation}/{n}.m4s` - Media segment
//! - `GET {stream}/{representation}/{n}.vtt` - Subtitle segment
//!
//! Encoder feedback:
//! - `POST /internal/transcoder/{id}/progress`

mod cache;
mod handlers;
mod manifests;
mod representations;
mod segments;

pub use cache::RepresentationCache;
pub use handlers::{playable_codecs, SegmentFile, StreamInfo, DASH_MIME, HLS_MIME};
pub use manifests::{dash_manifest, hls_master, ManifestMode};
pub use representations::{file_representations, stream_representation, StreamCandidates};
pub use segments::{wait_for_segment, ReadySegment};

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppContext;

/// Create the per-file streaming router.
pub fn files_router() -> Router<AppContext> {
    Router::new()
        .route("/:locator/:session/hls-manifest.m3u8", get(handlers::hls_manifest))
        .route(
            "/:locator/:session/hls-transmuxing-manifest.m3u8",
            get(handlers::hls_transmuxing_manifest),
        )
        .route(
            "/:locator/:session/hls-transcoding-manifest.m3u8",
            get(handlers::hls_transcoding_manifest),
        )
        .route("/:locator/:session/dash-manifest.mpd", get(handlers::dash_manifest))
        .route("/:locator/:session/streams", get(handlers::list_streams))
        .route(
            "/:locator/:session/:stream/:representation/:file",
            get(handlers::representation_file),
        )
}

/// Create the encoder feedback router.
pub fn transcoder_router() -> Router<AppContext> {
    Router::new().route("/:id/progress", post(handlers::transcoder_progress))
}
