//! Waiting for and reading segment files.

use crate::playback::{PlaybackLease, SegmentRequest};
use crate::transcode::AvailableSegments;
use bytes::Bytes;
use reelforge_common::{Error, Result, TranscodeSessionId};
use reelforge_media::fmp4::patch_sequence_numbers;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const INITIAL_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_millis(250);

/// A segment file that is complete on disk.
#[derive(Debug)]
pub struct ReadySegment {
    pub path: PathBuf,
    /// Listing the file was found in.
    pub available: AvailableSegments,
    /// First segment of the run that wrote the file.
    pub start_segment: u32,
    pub session_id: TranscodeSessionId,
}

/// Poll the session until the requested segment is complete.
///
/// A throttled session is resumed while the request waits on it.
///
/// # Errors
///
/// [`Error::SegmentTimeout`] when `timeout` passes first,
/// [`Error::SegmentNotFound`] when the session is torn down underneath the
/// request, [`Error::Internal`] for a lease that was never bound to a run.
pub async fn wait_for_segment(
    lease: &PlaybackLease,
    request: SegmentRequest,
    timeout: Duration,
) -> Result<ReadySegment> {
    let Some(session) = lease.session() else {
        return Err(Error::Internal(format!(
            "waiting for segment {request} on an unbound lease"
        )));
    };
    let deadline = Instant::now() + timeout;
    let mut poll = INITIAL_POLL;

    loop {
        if session.is_destroyed() {
            return Err(Error::SegmentNotFound {
                segment: request.to_string(),
            });
        }

        let available = match session.available_segments().await {
            Ok(available) => available,
            // Directory removed by a concurrent restart
            Err(_) if session.is_destroyed() => {
                return Err(Error::SegmentNotFound {
                    segment: request.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let found = match request {
            SegmentRequest::Init => available.init.clone(),
            SegmentRequest::Media(index) => available.get(index).map(Path::to_path_buf),
        };
        if let Some(path) = found {
            return Ok(ReadySegment {
                path,
                available,
                start_segment: session.start_segment(),
                session_id: session.id(),
            });
        }

        if session.is_throttled() {
            session.resume();
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(
                session_id = %session.id(),
                segment = %request,
                highest_on_disk = ?available.highest_on_disk,
                "Timed out waiting for segment"
            );
            return Err(Error::SegmentTimeout {
                segment: request.to_string(),
            });
        }

        tokio::time::sleep(poll.min(deadline - now)).await;
        poll = (poll * 2).min(MAX_POLL);
    }
}

/// Read a media segment fully and renumber its fragments.
///
/// Runs that do not start at segment zero number their fragments from one;
/// the fragment sequence numbers are rewritten to `index + 1` onwards so they
/// match a run that started at the beginning.
pub async fn read_patched(path: &Path, index: u32) -> Result<Bytes> {
    let mut data = read(path, SegmentRequest::Media(index)).await?;
    let patched = patch_sequence_numbers(&mut data, index + 1);
    tracing::trace!(segment = index, fragments = patched, "Patched fragment sequence numbers");
    Ok(Bytes::from(data))
}

/// Open a segment file for streaming.
pub async fn open(path: &Path, request: SegmentRequest) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| vanished(e, request))
}

async fn read(path: &Path, request: SegmentRequest) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| vanished(e, request))
}

fn vanished(e: std::io::Error, request: SegmentRequest) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::SegmentNotFound {
            segment: request.to_string(),
        }
    } else {
        Error::Io(e)
    }
}

/// Whether a segment served from this run needs renumbering.
pub fn needs_patch(start_segment: u32, request: SegmentRequest, path: &Path) -> bool {
    start_segment != 0
        && matches!(request, SegmentRequest::Media(_))
        && path.extension().is_some_and(|ext| ext == "m4s")
}
