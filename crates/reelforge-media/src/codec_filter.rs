//! Client codec capability matching.

use crate::representation::{Representation, StreamRepresentation};
use std::collections::HashSet;

/// Codec strings a client declared it can decode.
///
/// An empty set means the client declared nothing, and everything is
/// considered playable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayableCodecs(HashSet<String>);

impl PlayableCodecs {
    /// Build from the client's list.
    pub fn new<I, S>(codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            codecs
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| !c.is_empty())
                .collect(),
        )
    }

    /// Whether the client declared no codecs at all.
    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `codec` is in the set, by full string or by family (`avc1`).
    pub fn contains(&self, codec: &str) -> bool {
        if self.is_unrestricted() || self.0.contains(codec) {
            return true;
        }
        let family = codec.split('.').next().unwrap_or(codec);
        self.0.contains(family)
    }
}

/// Whether the client can decode `representation`.
pub fn can_play(representation: &Representation, playable: &PlayableCodecs) -> bool {
    playable.contains(&representation.codec)
}

/// The playable subset of `representations`, order preserved.
pub fn filter<'a>(
    representations: &'a [StreamRepresentation],
    playable: &PlayableCodecs,
) -> Vec<&'a StreamRepresentation> {
    representations
        .iter()
        .filter(|sr| can_play(&sr.representation, playable))
        .collect()
}

/// Pick the delivery path for one stream.
///
/// Prefers the transmuxed representation when the client can play it.
/// Otherwise takes the highest-bitrate playable transcode not above the
/// source bitrate, else the lowest-bitrate playable transcode.
pub fn choose_best<'a>(
    representations: &'a [StreamRepresentation],
    playable: &PlayableCodecs,
) -> Option<&'a StreamRepresentation> {
    let candidates = filter(representations, playable);

    if let Some(direct) = candidates.iter().find(|sr| sr.representation.transmuxed()) {
        return Some(*direct);
    }

    let transcoded: Vec<&StreamRepresentation> = candidates
        .into_iter()
        .filter(|sr| sr.representation.transcoded())
        .collect();

    transcoded
        .iter()
        .filter(|sr| sr.representation.bitrate <= sr.stream.bitrate)
        .max_by_key(|sr| sr.representation.bitrate)
        .or_else(|| {
            transcoded
                .iter()
                .min_by_key(|sr| sr.representation.bitrate)
        })
        .copied()
}
