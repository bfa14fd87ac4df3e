//! Resolving representations against probed files.

use crate::server::AppContext;
use reelforge_common::{FileLocator, Result, Stream, StreamKey};
use reelforge_media::{candidate_ids, RepresentationId, RepresentationResolver, StreamRepresentation};
use std::sync::Arc;

/// A stream with every representation offered for it.
#[derive(Debug, Clone)]
pub struct StreamCandidates {
    pub stream: Stream,
    /// Direct first, then ladder entries.
    pub representations: Vec<StreamRepresentation>,
}

/// Resolve one representation of one stream, through the cache.
///
/// # Errors
///
/// Probe failures, a missing stream, or an id that does not apply to it.
pub async fn stream_representation(
    ctx: &AppContext,
    key: &StreamKey,
    id: &RepresentationId,
) -> Result<Arc<StreamRepresentation>> {
    let stream = ctx.prober.get_stream(key).await?;
    let modified = ctx.prober.file_modified(&key.locator).await?;
    let stream = &stream;

    ctx.representations
        .get_or_try_insert_with(key, id, modified, || async move {
            let keyframes = if RepresentationResolver::needs_keyframes(stream, id) {
                ctx.prober.keyframes(key).await?
            } else {
                Arc::new(Vec::new())
            };
            ctx.resolver.resolve(stream, id, &keyframes)
        })
        .await
}

/// Every stream of a file with all of its candidate representations.
pub async fn file_representations(
    ctx: &AppContext,
    locator: &FileLocator,
) -> Result<Vec<StreamCandidates>> {
    let streams = ctx.prober.streams(locator).await?;

    let mut candidates = Vec::with_capacity(streams.len());
    for stream in streams {
        let key = StreamKey::new(locator.clone(), stream.index);
        let mut representations = Vec::new();
        for id in candidate_ids(&stream) {
            let sr = stream_representation(ctx, &key, &id).await?;
            representations.push(StreamRepresentation::clone(&sr));
        }
        candidates.push(StreamCandidates {
            stream,
            representations,
        });
    }

    tracing::debug!(
        locator = %locator,
        streams = candidates.len(),
        "Resolved file representations"
    );
    Ok(candidates)
}
