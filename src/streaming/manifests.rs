//! Picking representations for manifests.
//!
//! Turns the candidate representations of a file plus the client's codec
//! list into the inputs of the HLS and DASH builders.

use super::representations::StreamCandidates;
use reelforge_common::{Error, Result, StreamType};
use reelforge_media::codec_filter;
use reelforge_media::manifest::select_representations;
use reelforge_media::{
    build_dash_manifest, build_master_playlist, choose_best, PlayableCodecs,
    RepresentationCombination, StreamRepresentation,
};

/// Which delivery path an HLS master playlist offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMode {
    /// Transmux where the client can decode the source, else transcode.
    Best,
    /// Source packets only.
    Transmux,
    /// Transcoded ladder only.
    Transcode,
}

fn of_type(streams: &[StreamCandidates], stream_type: StreamType) -> impl Iterator<Item = &StreamCandidates> {
    streams
        .iter()
        .filter(move |c| c.stream.stream_type == stream_type)
}

fn direct(candidates: &StreamCandidates) -> Option<&StreamRepresentation> {
    candidates
        .representations
        .iter()
        .find(|sr| sr.representation.transmuxed())
}

fn transcoded(candidates: &StreamCandidates) -> Vec<StreamRepresentation> {
    candidates
        .representations
        .iter()
        .filter(|sr| sr.representation.transcoded())
        .cloned()
        .collect()
}

/// Video renditions for one stream under `mode`, best first.
fn video_ladder(
    candidates: &StreamCandidates,
    playable: &PlayableCodecs,
    mode: ManifestMode,
) -> Vec<StreamRepresentation> {
    match mode {
        ManifestMode::Best => select_representations(&candidates.representations, playable)
            .into_iter()
            .cloned()
            .collect(),
        ManifestMode::Transmux => direct(candidates).cloned().into_iter().collect(),
        ManifestMode::Transcode => select_representations(&transcoded(candidates), playable)
            .into_iter()
            .cloned()
            .collect(),
    }
}

/// The single audio rendition offered for one stream under `mode`.
fn audio_choice(
    candidates: &StreamCandidates,
    playable: &PlayableCodecs,
    mode: ManifestMode,
) -> Option<StreamRepresentation> {
    match mode {
        ManifestMode::Best => choose_best(&candidates.representations, playable).cloned(),
        ManifestMode::Transmux => direct(candidates).cloned(),
        ManifestMode::Transcode => choose_best(&transcoded(candidates), playable).cloned(),
    }
}

/// Audio renditions grouped by codec, so a variant never mixes decoders.
fn audio_groups(audio: Vec<StreamRepresentation>) -> Vec<(String, Vec<StreamRepresentation>)> {
    let mut groups: Vec<(String, Vec<StreamRepresentation>)> = Vec::new();
    for sr in audio {
        let codec = sr.representation.codec.clone();
        match groups.iter_mut().find(|(c, _)| *c == codec) {
            Some((_, members)) => members.push(sr),
            None => groups.push((codec, vec![sr])),
        }
    }
    groups
}

/// Build the HLS master playlist of a file.
///
/// Every video rendition is paired with every audio group. Subtitle streams
/// are always offered, transmuxed to WebVTT.
///
/// # Errors
///
/// [`Error::Validation`] when no stream has a rendition the client can play.
pub fn hls_master(
    streams: &[StreamCandidates],
    playable: &PlayableCodecs,
    mode: ManifestMode,
) -> Result<String> {
    let videos: Vec<StreamRepresentation> = of_type(streams, StreamType::Video)
        .flat_map(|c| video_ladder(c, playable, mode))
        .collect();
    let audio: Vec<StreamRepresentation> = of_type(streams, StreamType::Audio)
        .filter_map(|c| audio_choice(c, playable, mode))
        .collect();
    let subtitles: Vec<StreamRepresentation> = of_type(streams, StreamType::Subtitle)
        .filter_map(|c| direct(c).cloned())
        .collect();

    if videos.is_empty() && audio.is_empty() {
        return Err(Error::Validation(
            "no playable representation for the requested codecs".into(),
        ));
    }

    let groups = audio_groups(audio);
    let mut combinations = Vec::new();

    if videos.is_empty() {
        for (codec, members) in groups {
            combinations.push(RepresentationCombination {
                video: None,
                audio: members,
                audio_group: group_name(&codec),
                audio_codec: codec,
            });
        }
    } else {
        for video in &videos {
            if groups.is_empty() {
                combinations.push(RepresentationCombination {
                    video: Some(video.clone()),
                    audio: Vec::new(),
                    audio_group: String::new(),
                    audio_codec: String::new(),
                });
            }
            for (codec, members) in &groups {
                combinations.push(RepresentationCombination {
                    video: Some(video.clone()),
                    audio: members.clone(),
                    audio_group: group_name(codec),
                    audio_codec: codec.clone(),
                });
            }
        }
    }

    Ok(build_master_playlist(&combinations, &subtitles))
}

fn group_name(codec: &str) -> String {
    format!("audio-{codec}")
}

/// Build the DASH MPD of a file.
///
/// # Errors
///
/// [`Error::Validation`] when no stream has a rendition the client can play.
pub fn dash_manifest(streams: &[StreamCandidates], playable: &PlayableCodecs) -> Result<String> {
    let select = |stream_type| -> Vec<StreamRepresentation> {
        of_type(streams, stream_type)
            .flat_map(|c| select_representations(&c.representations, playable))
            .cloned()
            .collect()
    };
    let video = select(StreamType::Video);
    let audio = select(StreamType::Audio);

    if video.is_empty() && audio.is_empty() {
        return Err(Error::Validation(
            "no playable representation for the requested codecs".into(),
        ));
    }

    Ok(build_dash_manifest(&video, &audio))
}

/// Whether the client can play anything in `candidates`.
pub fn any_playable(candidates: &StreamCandidates, playable: &PlayableCodecs) -> bool {
    !codec_filter::filter(&candidates.representations, playable).is_empty()
}
