//! Static MPEG-DASH manifest generation.

use crate::codec_filter::{self, PlayableCodecs};
use crate::manifest::hls::representation_uri;
use crate::representation::StreamRepresentation;
use std::fmt::Write;

/// Representations offered for one stream over DASH.
///
/// The best playable representation comes first, followed by every playable
/// transcode with a strictly lower bitrate, highest first.
pub fn select_representations<'a>(
    representations: &'a [StreamRepresentation],
    playable: &PlayableCodecs,
) -> Vec<&'a StreamRepresentation> {
    let Some(best) = codec_filter::choose_best(representations, playable) else {
        return Vec::new();
    };

    let mut lower: Vec<&StreamRepresentation> = codec_filter::filter(representations, playable)
        .into_iter()
        .filter(|sr| {
            sr.representation.transcoded() && sr.representation.bitrate < best.representation.bitrate
        })
        .collect();
    lower.sort_by(|a, b| b.representation.bitrate.cmp(&a.representation.bitrate));

    let mut selected = vec![best];
    selected.extend(lower);
    selected
}

/// Build a static MPD covering the given video and audio representations.
///
/// Representations are grouped into one adaptation set per source stream.
/// Segment URLs are relative to the manifest.
pub fn build_manifest(video: &[StreamRepresentation], audio: &[StreamRepresentation]) -> String {
    let duration = video
        .iter()
        .chain(audio)
        .map(|sr| sr.stream.duration)
        .fold(0.0, f64::max);
    let max_segment = video
        .iter()
        .chain(audio)
        .map(StreamRepresentation::max_segment_duration_secs)
        .fold(0.0, f64::max);

    let mut out = String::new();
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(
        out,
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011" type="static" mediaPresentationDuration="{}" minBufferTime="PT2S" maxSegmentDuration="{}">"#,
        iso_duration(duration),
        iso_duration(max_segment)
    )
    .unwrap();
    writeln!(out, r#"  <Period id="0" start="PT0S">"#).unwrap();

    let mut set_id = 0;
    for group in group_by_stream(video).into_iter().chain(group_by_stream(audio)) {
        write_adaptation_set(&mut out, set_id, &group);
        set_id += 1;
    }

    writeln!(out, "  </Period>").unwrap();
    writeln!(out, "</MPD>").unwrap();
    out
}

fn group_by_stream(reps: &[StreamRepresentation]) -> Vec<Vec<&StreamRepresentation>> {
    let mut groups: Vec<Vec<&StreamRepresentation>> = Vec::new();
    for sr in reps {
        match groups
            .iter_mut()
            .find(|g| g[0].stream.index == sr.stream.index)
        {
            Some(group) => group.push(sr),
            None => groups.push(vec![sr]),
        }
    }
    groups
}

fn write_adaptation_set(out: &mut String, id: u32, group: &[&StreamRepresentation]) {
    let first = group[0];
    let content_type = first.stream_type().to_string();

    write!(
        out,
        r#"    <AdaptationSet id="{}" contentType="{}" mimeType="{}" segmentAlignment="true""#,
        id, content_type, first.representation.mime_type
    )
    .unwrap();
    if let Some(ref language) = first.stream.language {
        write!(out, r#" lang="{}""#, escape(language)).unwrap();
    }
    writeln!(out, ">").unwrap();

    for sr in group {
        write_representation(out, sr);
    }

    writeln!(out, "    </AdaptationSet>").unwrap();
}

fn write_representation(out: &mut String, sr: &StreamRepresentation) {
    let rep = &sr.representation;
    let stream = &sr.stream;
    let rep_id = format!("{}-{}", stream.index, rep.id.path_segment());

    write!(
        out,
        r#"      <Representation id="{}" bandwidth="{}" codecs="{}""#,
        escape(&rep_id),
        rep.bitrate,
        escape(&rep.codec)
    )
    .unwrap();
    if rep.width > 0 && rep.height > 0 {
        write!(out, r#" width="{}" height="{}""#, rep.width, rep.height).unwrap();
    }
    if !stream.frame_rate.is_zero() && stream.frame_rate.den != 0 {
        write!(out, r#" frameRate="{}""#, stream.frame_rate).unwrap();
    }
    writeln!(out, ">").unwrap();

    // Timescale is the stream clock; durations are scaled by the numerator.
    let scale = stream.time_base.num.max(1);
    let base = escape(&representation_uri(sr));
    writeln!(
        out,
        r#"        <SegmentTemplate timescale="{}" initialization="{base}/init.mp4" media="{base}/$Number$.m4s" startNumber="0">"#,
        stream.time_base.den.max(1),
    )
    .unwrap();
    writeln!(out, "          <SegmentTimeline>").unwrap();

    for (start, duration, repeat) in timeline_runs(sr) {
        let (start, duration) = (start * scale, duration * scale);
        if repeat > 0 {
            writeln!(out, r#"            <S t="{start}" d="{duration}" r="{repeat}"/>"#).unwrap();
        } else {
            writeln!(out, r#"            <S t="{start}" d="{duration}"/>"#).unwrap();
        }
    }

    writeln!(out, "          </SegmentTimeline>").unwrap();
    writeln!(out, "        </SegmentTemplate>").unwrap();
    writeln!(out, "      </Representation>").unwrap();
}

/// Run-length encoded `(start, duration, repeat)` entries in stream ticks.
fn timeline_runs(sr: &StreamRepresentation) -> Vec<(i64, i64, u32)> {
    let mut runs: Vec<(i64, i64, u32)> = Vec::new();
    for (start, duration) in sr.segment_starts.iter().zip(sr.segment_durations_ticks()) {
        match runs.last_mut() {
            Some((_, d, r)) if *d == duration => *r += 1,
            _ => runs.push((*start, duration, 0)),
        }
    }
    runs
}

fn iso_duration(secs: f64) -> String {
    format!("PT{:.3}S", secs.max(0.0))
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representation::RepresentationId;
    use crate::resolver::{candidate_ids, RepresentationResolver};
    use reelforge_common::{Rational, Stream, StreamType};

    fn video(codec: &str, bitrate: u64) -> Stream {
        Stream {
            index: 0,
            duration: 20.0,
            time_base: Rational::new(1, 1000),
            duration_ticks: 20_000,
            codec: codec.into(),
            codec_name: String::new(),
            bitrate,
            frame_rate: Rational::new(25, 1),
            width: 1920,
            height: 1080,
            stream_type: StreamType::Video,
            language: None,
            title: None,
            default: true,
        }
    }

    fn audio() -> Stream {
        Stream {
            index: 1,
            time_base: Rational::new(1, 48_000),
            duration_ticks: 960_000,
            codec: "mp4a.40.2".into(),
            bitrate: 128_000,
            frame_rate: Rational::default(),
            width: 0,
            height: 0,
            stream_type: StreamType::Audio,
            language: Some("fr\"a".into()),
            ..video("", 0)
        }
    }

    fn all(stream: &Stream) -> Vec<StreamRepresentation> {
        let resolver = RepresentationResolver::default();
        candidate_ids(stream)
            .iter()
            .map(|id| resolver.resolve(stream, id, &[0, 5000, 10_000, 15_000]).unwrap())
            .collect()
    }

    #[test]
    fn test_manifest_structure() {
        let v = all(&video("avc1.640028", 6_000_000));
        let a = all(&audio());
        let mpd = build_manifest(&v[..1], &a[..1]);

        assert!(mpd.contains(r#"type="static""#));
        assert!(mpd.contains(r#"mediaPresentationDuration="PT20.000S""#));
        assert!(mpd.contains(r#"contentType="video" mimeType="video/mp4""#));
        assert!(mpd.contains(r#"lang="fr&quot;a""#));
        assert!(mpd.contains(r#"<Representation id="0-direct" bandwidth="6000000" codecs="avc1.640028" width="1920" height="1080" frameRate="25/1">"#));
        assert!(mpd.contains(r#"initialization="0/direct/init.mp4" media="0/direct/$Number$.m4s" startNumber="0""#));
        assert!(mpd.contains(r#"<S t="0" d="5000" r="3"/>"#));
        assert!(mpd.contains(r#"timescale="48000""#));
        assert!(mpd.contains(r#"<S t="0" d="240000" r="3"/>"#));
    }

    #[test]
    fn test_selection_keeps_lower_transcodes() {
        let v = all(&video("hvc1.2.4.L150.B0", 5_000_000));
        let playable = PlayableCodecs::new(["avc1"]);
        let selected = select_representations(&v, &playable);
        let bitrates: Vec<u64> = selected.iter().map(|sr| sr.representation.bitrate).collect();
        assert_eq!(
            bitrates,
            vec![4_000_000, 2_000_000, 1_000_000, 500_000]
        );
    }

    #[test]
    fn test_selection_with_direct() {
        let v = all(&video("avc1.640028", 3_000_000));
        let selected = select_representations(&v, &PlayableCodecs::default());
        assert_eq!(selected[0].representation.id, RepresentationId::Direct);
        assert!(selected[1..]
            .iter()
            .all(|sr| sr.representation.bitrate < 3_000_000));
    }

    #[test]
    fn test_preset_ids_escaped_in_urls() {
        let v = all(&video("avc1.640028", 6_000_000));
        let preset = v
            .iter()
            .find(|sr| sr.representation.id.to_string() == "720p/2000kbps")
            .unwrap();
        let mpd = build_manifest(std::slice::from_ref(preset), &[]);
        assert!(mpd.contains(r#"media="0/720p%2F2000kbps/$Number$.m4s""#));
        assert!(mpd.contains(r#"id="0-720p%2F2000kbps""#));
    }
}
