//! HLS playlist structures and builders.
//!
//! All URIs are relative. The master playlist lives at the session root, and
//! each media playlist lives at `{stream}/{representation}/index.m3u8` next
//! to its segments.

use crate::representation::StreamRepresentation;
use reelforge_common::StreamType;
use std::fmt::Write;

/// Group id used for subtitle renditions.
pub const SUBTITLE_GROUP: &str = "subs";

/// Directory of a representation relative to the session root.
pub fn representation_uri(sr: &StreamRepresentation) -> String {
    format!(
        "{}/{}",
        sr.stream.index,
        sr.representation.id.path_segment()
    )
}

/// Media playlist for a single rendition.
///
/// Every segment is known up front, so playlists are always complete VOD
/// lists starting at sequence 0.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Init segment URI, absent for WebVTT.
    pub init_uri: Option<String>,
    /// Segment entries.
    pub segments: Vec<SegmentEntry>,
}

impl MediaPlaylist {
    /// Create an empty VOD playlist.
    pub fn vod() -> Self {
        Self {
            target_duration: 6,
            init_uri: None,
            segments: Vec::new(),
        }
    }

    /// Playlist listing every segment of a representation.
    pub fn from_stream_representation(sr: &StreamRepresentation) -> Self {
        let mut playlist = Self::vod();
        playlist.target_duration = sr.max_segment_duration_secs().ceil().max(1.0) as u32;

        let extension = match sr.stream_type() {
            StreamType::Subtitle => "vtt",
            _ => {
                playlist.init_uri = Some("init.mp4".to_string());
                "m4s"
            }
        };

        playlist.segments = sr
            .segment_durations_secs()
            .into_iter()
            .enumerate()
            .map(|(i, duration)| SegmentEntry {
                duration,
                uri: format!("{i}.{extension}"),
            })
            .collect();

        playlist
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:0").unwrap();
        writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap();
        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        if let Some(ref init_uri) = self.init_uri {
            writeln!(out, "#EXT-X-MAP:URI=\"{}\"", init_uri).unwrap();
        }

        for segment in &self.segments {
            writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            writeln!(out, "{}", segment.uri).unwrap();
        }

        writeln!(out, "#EXT-X-ENDLIST").unwrap();

        out
    }
}

/// A segment entry in the playlist.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
}

/// Kind of alternative rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    Audio,
    Subtitles,
}

/// An `#EXT-X-MEDIA` entry.
#[derive(Debug, Clone)]
pub struct Rendition {
    /// Audio or subtitles.
    pub kind: RenditionKind,
    /// Group this rendition belongs to.
    pub group_id: String,
    /// Human readable name.
    pub name: String,
    /// Language tag.
    pub language: Option<String>,
    /// Selected when the user expresses no preference.
    pub default: bool,
    /// Media playlist URI.
    pub uri: String,
}

/// An `#EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone)]
pub struct VariantStream {
    /// Playlist URI.
    pub uri: String,
    /// Peak bandwidth in bits per second.
    pub bandwidth: u64,
    /// Video size, absent for audio-only variants.
    pub resolution: Option<(u32, u32)>,
    /// Codec list (e.g., "avc1.64001f,mp4a.40.2").
    pub codecs: String,
    /// Frame rate.
    pub frame_rate: Option<f64>,
    /// Audio group ID.
    pub audio_group: Option<String>,
    /// Subtitle group ID.
    pub subtitle_group: Option<String>,
}

/// Master playlist with multiple renditions.
#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    /// Alternative audio and subtitle renditions.
    pub renditions: Vec<Rendition>,
    /// Stream variants.
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    /// Create a new master playlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:6").unwrap();
        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        for rendition in &self.renditions {
            let kind = match rendition.kind {
                RenditionKind::Audio => "AUDIO",
                RenditionKind::Subtitles => "SUBTITLES",
            };
            write!(
                out,
                "#EXT-X-MEDIA:TYPE={},GROUP-ID=\"{}\",NAME=\"{}\"",
                kind,
                quoted(&rendition.group_id),
                quoted(&rendition.name)
            )
            .unwrap();
            if let Some(ref language) = rendition.language {
                write!(out, ",LANGUAGE=\"{}\"", quoted(language)).unwrap();
            }
            let default = if rendition.default { "YES" } else { "NO" };
            writeln!(
                out,
                ",DEFAULT={default},AUTOSELECT=YES,URI=\"{}\"",
                rendition.uri
            )
            .unwrap();
        }

        for variant in &self.variants {
            write!(out, "#EXT-X-STREAM-INF:BANDWIDTH={}", variant.bandwidth).unwrap();

            if let Some((width, height)) = variant.resolution {
                write!(out, ",RESOLUTION={}x{}", width, height).unwrap();
            }

            if !variant.codecs.is_empty() {
                write!(out, ",CODECS=\"{}\"", variant.codecs).unwrap();
            }

            if let Some(frame_rate) = variant.frame_rate {
                write!(out, ",FRAME-RATE={:.3}", frame_rate).unwrap();
            }

            if let Some(ref audio) = variant.audio_group {
                write!(out, ",AUDIO=\"{}\"", audio).unwrap();
            }

            if let Some(ref subs) = variant.subtitle_group {
                write!(out, ",SUBTITLES=\"{}\"", subs).unwrap();
            }

            writeln!(out).unwrap();
            writeln!(out, "{}", variant.uri).unwrap();
        }

        out
    }
}

/// One video representation with the audio representations it plays with.
///
/// All audio entries share `audio_group` and `audio_codec`, so players can
/// switch languages without changing decoders.
#[derive(Debug, Clone)]
pub struct RepresentationCombination {
    /// Video rendition, absent for audio-only media.
    pub video: Option<StreamRepresentation>,
    /// Audio renditions in the group.
    pub audio: Vec<StreamRepresentation>,
    /// Audio group id.
    pub audio_group: String,
    /// Codec string shared by the audio group.
    pub audio_codec: String,
}

/// Build a master playlist from representation combinations and subtitles.
pub fn build_master_playlist(
    combinations: &[RepresentationCombination],
    subtitles: &[StreamRepresentation],
) -> String {
    let mut master = MasterPlaylist::new();
    let mut seen_groups: Vec<&str> = Vec::new();

    for combination in combinations {
        if seen_groups.contains(&combination.audio_group.as_str()) {
            continue;
        }
        seen_groups.push(&combination.audio_group);

        let default_index = combination
            .audio
            .iter()
            .position(|sr| sr.stream.default)
            .unwrap_or(0);
        for (i, sr) in combination.audio.iter().enumerate() {
            master.renditions.push(Rendition {
                kind: RenditionKind::Audio,
                group_id: combination.audio_group.clone(),
                name: display_name(sr, "Audio"),
                language: sr.stream.language.clone(),
                default: i == default_index,
                uri: format!("{}/index.m3u8", representation_uri(sr)),
            });
        }
    }

    let default_subtitle = subtitles.iter().position(|sr| sr.stream.default);
    for (i, sr) in subtitles.iter().enumerate() {
        master.renditions.push(Rendition {
            kind: RenditionKind::Subtitles,
            group_id: SUBTITLE_GROUP.to_string(),
            name: display_name(sr, "Subtitles"),
            language: sr.stream.language.clone(),
            default: default_subtitle == Some(i),
            uri: format!("{}/index.m3u8", representation_uri(sr)),
        });
    }
    let subtitle_group = (!subtitles.is_empty()).then(|| SUBTITLE_GROUP.to_string());

    for combination in combinations {
        let audio_bandwidth = combination
            .audio
            .iter()
            .map(|sr| sr.representation.bitrate)
            .max()
            .unwrap_or(0);
        let audio_group = (!combination.audio.is_empty()).then(|| combination.audio_group.clone());

        match &combination.video {
            Some(video) => {
                let rep = &video.representation;
                let mut codecs = rep.codec.clone();
                if audio_group.is_some() {
                    codecs.push(',');
                    codecs.push_str(&combination.audio_codec);
                }
                let frame_rate = video.stream.frame_rate.as_f64();
                master.variants.push(VariantStream {
                    uri: format!("{}/index.m3u8", representation_uri(video)),
                    bandwidth: rep.bitrate + audio_bandwidth,
                    resolution: Some((rep.width, rep.height)),
                    codecs,
                    frame_rate: (frame_rate > 0.0).then_some(frame_rate),
                    audio_group,
                    subtitle_group: subtitle_group.clone(),
                });
            }
            None => {
                if let Some(audio) = combination.audio.first() {
                    master.variants.push(VariantStream {
                        uri: format!("{}/index.m3u8", representation_uri(audio)),
                        bandwidth: audio_bandwidth,
                        resolution: None,
                        codecs: combination.audio_codec.clone(),
                        frame_rate: None,
                        audio_group: None,
                        subtitle_group: subtitle_group.clone(),
                    });
                }
            }
        }
    }

    master.render()
}

/// Build the media playlist of one representation.
pub fn build_media_playlist(sr: &StreamRepresentation) -> String {
    MediaPlaylist::from_stream_representation(sr).render()
}

fn display_name(sr: &StreamRepresentation, fallback: &str) -> String {
    sr.stream
        .title
        .clone()
        .or_else(|| sr.stream.language.clone())
        .unwrap_or_else(|| format!("{fallback} {}", sr.stream.index))
}

fn quoted(value: &str) -> String {
    value.replace('"', "'").replace(['\r', '\n'], " ")
}
