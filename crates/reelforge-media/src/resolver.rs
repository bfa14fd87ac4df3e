//! Maps a probed stream and a representation id to a [`StreamRepresentation`].

use crate::params::EncoderParams;
use crate::presets;
use crate::representation::{Representation, RepresentationId, StreamRepresentation};
use crate::segments::{
    constant_segment_durations, keyframe_intervals, plan_transmux_segments, spacing_ticks,
};
use reelforge_common::{Error, Result, Stream, StreamType};

/// Default segment spacing in seconds.
pub const DEFAULT_SEGMENT_DURATION_SECS: f64 = 5.0;

/// Resolves representation ids against probed streams.
#[derive(Debug, Clone)]
pub struct RepresentationResolver {
    segment_duration_secs: f64,
}

impl Default for RepresentationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_DURATION_SECS)
    }
}

impl RepresentationResolver {
    /// Create a resolver cutting segments about `segment_duration_secs` long.
    pub fn new(segment_duration_secs: f64) -> Self {
        Self {
            segment_duration_secs,
        }
    }

    /// Target segment length in seconds.
    pub fn segment_duration_secs(&self) -> f64 {
        self.segment_duration_secs
    }

    /// Whether resolving `id` for `stream` needs its keyframe list.
    pub fn needs_keyframes(stream: &Stream, id: &RepresentationId) -> bool {
        id.is_direct() && stream.stream_type == StreamType::Video
    }

    /// Resolve `id` for `stream`.
    ///
    /// `keyframes` is only consulted for transmuxed video (see
    /// [`needs_keyframes`](Self::needs_keyframes)); an empty list yields a
    /// single segment.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownRepresentation`] for names outside the ladders,
    /// [`Error::UnsupportedStreamType`] when the id does not apply to the
    /// stream's type.
    pub fn resolve(
        &self,
        stream: &Stream,
        id: &RepresentationId,
        keyframes: &[i64],
    ) -> Result<StreamRepresentation> {
        match id {
            RepresentationId::Direct => Ok(self.transmux(stream, keyframes)),
            RepresentationId::Preset(name) => {
                let params = preset_params(stream, name)?;
                Ok(self.transcode(stream, id.clone(), params))
            }
            RepresentationId::Custom(params) => {
                if stream.stream_type != params.stream_type() {
                    return Err(Error::unsupported_stream_type(id, stream.stream_type));
                }
                Ok(self.transcode(stream, id.clone(), params.clone()))
            }
        }
    }

    fn transmux(&self, stream: &Stream, keyframes: &[i64]) -> StreamRepresentation {
        let spacing = spacing_ticks(self.segment_duration_secs, stream.time_base);
        let segments = match stream.stream_type {
            StreamType::Video => {
                let intervals =
                    keyframe_intervals(keyframes, stream.duration_ticks, stream.time_base);
                let planned = plan_transmux_segments(&intervals, spacing);
                tracing::debug!(
                    stream = stream.index,
                    keyframes = keyframes.len(),
                    segments = planned.len(),
                    "Planned keyframe-aligned segments"
                );
                planned
            }
            StreamType::Audio | StreamType::Subtitle => {
                constant_segment_durations(stream.duration_ticks, spacing, stream.time_base)
            }
        };

        StreamRepresentation {
            stream: stream.clone(),
            representation: Representation::transmux(stream),
            segment_starts: segments.starts(),
        }
    }

    fn transcode(
        &self,
        stream: &Stream,
        id: RepresentationId,
        params: EncoderParams,
    ) -> StreamRepresentation {
        // Transcoded output forces a keyframe at every grid point.
        let spacing = spacing_ticks(self.segment_duration_secs, stream.time_base);
        let segments = constant_segment_durations(stream.duration_ticks, spacing, stream.time_base);

        StreamRepresentation {
            stream: stream.clone(),
            representation: Representation::transcode(stream, id, params),
            segment_starts: segments.starts(),
        }
    }
}

fn preset_params(stream: &Stream, name: &str) -> Result<EncoderParams> {
    match stream.stream_type {
        StreamType::Video => {
            if let Some(preset) = presets::video_preset(name) {
                return Ok(preset.params(stream));
            }
        }
        StreamType::Audio => {
            if let Some(preset) = presets::audio_preset(name) {
                return Ok(preset.params());
            }
        }
        StreamType::Subtitle => {}
    }

    if presets::is_preset(name) {
        Err(Error::unsupported_stream_type(name, stream.stream_type))
    } else {
        Err(Error::UnknownRepresentation(name.to_string()))
    }
}

/// Every representation id offered for a stream: direct first, then the
/// ladder entries that do not upscale it.
pub fn candidate_ids(stream: &Stream) -> Vec<RepresentationId> {
    let mut ids = vec![RepresentationId::Direct];
    match stream.stream_type {
        StreamType::Video => ids.extend(
            presets::VIDEO_PRESETS
                .iter()
                .filter(|p| p.fits(stream))
                .map(|p| RepresentationId::Preset(p.name.to_string())),
        ),
        StreamType::Audio => ids.extend(
            presets::AUDIO_PRESETS
                .iter()
                .map(|p| RepresentationId::Preset(p.name.to_string())),
        ),
        StreamType::Subtitle => {}
    }
    ids
}
