//! HTTP handlers for manifests, playlists and segments.

use super::manifests::{self, ManifestMode};
use super::representations::{file_representations, stream_representation};
use super::segments::{self, wait_for_segment};
use crate::playback::{PlaybackSessionKey, SegmentRequest};
use crate::server::{AppContext, AppError};
use crate::transcode::ProgressParser;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use reelforge_common::{Error, FileLocator, PlayerSessionId, StreamKey, StreamType, TranscodeSessionId};
use reelforge_media::{build_media_playlist, PlayableCodecs, RepresentationId};
use serde::Serialize;
use std::str::FromStr;
use tokio_util::io::ReaderStream;

pub const HLS_MIME: &str = "application/x-mpegURL";
pub const DASH_MIME: &str = "application/dash+xml";

/// Query key carrying the client's decodable codecs.
const PLAYABLE_CODECS: &str = "playableCodecs";

type HandlerResult<T = Response> = Result<T, AppError>;

/// Collect `playableCodecs`, repeated or comma separated.
pub fn playable_codecs(query: &[(String, String)]) -> PlayableCodecs {
    PlayableCodecs::new(
        query
            .iter()
            .filter(|(k, _)| k == PLAYABLE_CODECS)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from),
    )
}

fn parse<T: FromStr<Err = Error>>(raw: &str) -> Result<T, AppError> {
    raw.parse().map_err(AppError::from)
}

fn text(content_type: &'static str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn master(
    ctx: &AppContext,
    locator: &str,
    query: &[(String, String)],
    mode: ManifestMode,
) -> HandlerResult {
    let locator: FileLocator = parse(locator)?;
    let streams = file_representations(ctx, &locator).await?;
    let playable = playable_codecs(query);
    let m3u8 = manifests::hls_master(&streams, &playable, mode)?;
    Ok(text(HLS_MIME, m3u8))
}

/// Master playlist, transmuxing where the client can decode the source.
pub async fn hls_manifest(
    State(ctx): State<AppContext>,
    Path((locator, _session)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> HandlerResult {
    master(&ctx, &locator, &query, ManifestMode::Best).await
}

/// Master playlist offering only transmuxed renditions.
pub async fn hls_transmuxing_manifest(
    State(ctx): State<AppContext>,
    Path((locator, _session)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> HandlerResult {
    master(&ctx, &locator, &query, ManifestMode::Transmux).await
}

/// Master playlist offering only transcoded renditions.
pub async fn hls_transcoding_manifest(
    State(ctx): State<AppContext>,
    Path((locator, _session)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> HandlerResult {
    master(&ctx, &locator, &query, ManifestMode::Transcode).await
}

/// Static DASH manifest.
pub async fn dash_manifest(
    State(ctx): State<AppContext>,
    Path((locator, _session)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> HandlerResult {
    let locator: FileLocator = parse(&locator)?;
    let streams = file_representations(&ctx, &locator).await?;
    let mpd = manifests::dash_manifest(&streams, &playable_codecs(&query))?;
    Ok(text(DASH_MIME, mpd))
}

#[derive(Debug, Serialize)]
pub struct StreamInfo {
    pub index: u32,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub codec: String,
    pub codec_name: String,
    pub bitrate: u64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub default: bool,
}

/// Probed streams of a file.
pub async fn list_streams(
    State(ctx): State<AppContext>,
    Path((locator, _session)): Path<(String, String)>,
) -> HandlerResult<Json<Vec<StreamInfo>>> {
    let locator: FileLocator = parse(&locator)?;
    let streams = ctx.prober.streams(&locator).await?;
    Ok(Json(
        streams
            .into_iter()
            .map(|s| StreamInfo {
                index: s.index,
                stream_type: s.stream_type.to_string(),
                codec: s.codec,
                codec_name: s.codec_name,
                bitrate: s.bitrate,
                duration: s.duration,
                width: s.width,
                height: s.height,
                frame_rate: s.frame_rate.to_string(),
                language: s.language,
                title: s.title,
                default: s.default,
            })
            .collect(),
    ))
}

/// Last path segment of a per-representation URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    /// `index.m3u8`
    Playlist,
    /// `init.mp4`
    Init,
    /// `<n>.m4s`
    Media(u32),
    /// `<n>.vtt`
    Subtitle(u32),
}

impl FromStr for SegmentFile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "index.m3u8" => return Ok(Self::Playlist),
            "init.mp4" => return Ok(Self::Init),
            _ => {}
        }
        let invalid = || Error::Validation(format!("invalid segment file: {s}"));
        let (stem, ext) = s.rsplit_once('.').ok_or_else(invalid)?;
        let index: u32 = stem.parse().map_err(|_| invalid())?;
        match ext {
            "m4s" => Ok(Self::Media(index)),
            "vtt" => Ok(Self::Subtitle(index)),
            _ => Err(invalid()),
        }
    }
}

impl SegmentFile {
    fn request(self) -> Option<SegmentRequest> {
        match self {
            Self::Playlist => None,
            Self::Init => Some(SegmentRequest::Init),
            Self::Media(index) | Self::Subtitle(index) => Some(SegmentRequest::Media(index)),
        }
    }

    fn fits(self, stream_type: StreamType) -> bool {
        match self {
            Self::Playlist => true,
            Self::Init | Self::Media(_) => stream_type != StreamType::Subtitle,
            Self::Subtitle(_) => stream_type == StreamType::Subtitle,
        }
    }
}

/// Media playlist, init segment, or numbered segment of one representation.
pub async fn representation_file(
    State(ctx): State<AppContext>,
    Path((locator, session, stream_index, representation, file)): Path<(
        String,
        String,
        u32,
        String,
        String,
    )>,
) -> HandlerResult {
    let locator: FileLocator = parse(&locator)?;
    let player: PlayerSessionId = parse(&session)?;
    let id: RepresentationId = parse(&representation)?;
    let file: SegmentFile = parse(&file)?;

    let stream = StreamKey::new(locator, stream_index);
    let sr = stream_representation(&ctx, &stream, &id).await?;

    if !file.fits(sr.stream_type()) {
        return Err(Error::Validation(format!(
            "{file:?} is not served for {} streams",
            sr.stream_type()
        ))
        .into());
    }

    let Some(request) = file.request() else {
        return Ok(text(HLS_MIME, build_media_playlist(&sr)));
    };

    if let SegmentRequest::Media(index) = request {
        if index >= sr.segment_count() {
            return Err(Error::SegmentNotFound {
                segment: index.to_string(),
            }
            .into());
        }
    }

    let source = ctx.prober.resolve(&stream.locator)?;
    let key = PlaybackSessionKey {
        stream,
        representation: id,
        player,
    };

    let lease = ctx.playback.acquire(&key, request, &sr, &source).await?;
    let lease = ctx.playback.bind(lease).await?;
    let ready = wait_for_segment(&lease, request, ctx.config.transcode.segment_timeout()).await?;

    let content_type = match file {
        SegmentFile::Init => "video/mp4",
        _ => sr.representation.mime_type,
    };

    let body = if segments::needs_patch(ready.start_segment, request, &ready.path) {
        let SegmentRequest::Media(index) = request else {
            return Err(Error::Internal("patching a non-media segment".into()).into());
        };
        Body::from(segments::read_patched(&ready.path, index).await?)
    } else {
        let handle = segments::open(&ready.path, request).await?;
        Body::from_stream(ReaderStream::new(handle))
    };

    if let SegmentRequest::Media(index) = request {
        lease.mark_served(index, &ready.available).await;
    }

    tracing::debug!(
        key = %key,
        session_id = %ready.session_id,
        segment = %request,
        "Serving segment"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Encoder progress callback.
///
/// The encoder keeps the request open and streams one report block after
/// another; each block feeds the throttle decision.
pub async fn transcoder_progress(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Body,
) -> HandlerResult<StatusCode> {
    let id: TranscodeSessionId = parse(&id)?;
    let mut parser = ProgressParser::new();
    let mut chunks = body.into_data_stream();

    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(session_id = %id, error = %e, "Progress stream ended");
                break;
            }
        };
        for report in parser.push(&chunk) {
            ctx.playback.on_progress(id, report).await;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
