//! Fixed transcoding ladders.

use crate::params::{EncoderParams, PRESERVE_ASPECT};
use reelforge_common::Stream;

/// A named video rendition: target height and bitrate, width follows aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoPreset {
    /// Representation id, e.g. `720p/2000kbps`.
    pub name: &'static str,
    /// Output height in pixels.
    pub height: u32,
    /// Video bitrate in bits per second.
    pub video_bitrate: u64,
}

/// A named AAC audio rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPreset {
    /// Representation id, e.g. `aac/128kbps`.
    pub name: &'static str,
    /// Audio bitrate in bits per second.
    pub bitrate: u64,
}

/// Video ladder, ascending by bitrate.
pub const VIDEO_PRESETS: &[VideoPreset] = &[
    VideoPreset { name: "360p/500kbps", height: 360, video_bitrate: 500_000 },
    VideoPreset { name: "480p/1000kbps", height: 480, video_bitrate: 1_000_000 },
    VideoPreset { name: "720p/2000kbps", height: 720, video_bitrate: 2_000_000 },
    VideoPreset { name: "720p/4000kbps", height: 720, video_bitrate: 4_000_000 },
    VideoPreset { name: "1080p/4000kbps", height: 1080, video_bitrate: 4_000_000 },
    VideoPreset { name: "1080p/8000kbps", height: 1080, video_bitrate: 8_000_000 },
];

/// Audio ladder, ascending by bitrate.
pub const AUDIO_PRESETS: &[AudioPreset] = &[
    AudioPreset { name: "aac/64kbps", bitrate: 64_000 },
    AudioPreset { name: "aac/128kbps", bitrate: 128_000 },
    AudioPreset { name: "aac/192kbps", bitrate: 192_000 },
];

/// Look up a video preset by name.
pub fn video_preset(name: &str) -> Option<&'static VideoPreset> {
    VIDEO_PRESETS.iter().find(|p| p.name == name)
}

/// Look up an audio preset by name.
pub fn audio_preset(name: &str) -> Option<&'static AudioPreset> {
    AUDIO_PRESETS.iter().find(|p| p.name == name)
}

/// Whether `name` is any known preset.
pub fn is_preset(name: &str) -> bool {
    video_preset(name).is_some() || audio_preset(name).is_some()
}

impl VideoPreset {
    /// Encoder settings for this preset applied to `source`.
    pub fn params(&self, source: &Stream) -> EncoderParams {
        EncoderParams::video(
            PRESERVE_ASPECT,
            self.height as i32,
            self.video_bitrate,
            source.width,
            source.height,
        )
    }

    /// Whether this preset would not upscale `source`.
    pub fn fits(&self, source: &Stream) -> bool {
        self.height <= source.height
    }
}

impl AudioPreset {
    /// Encoder settings for this preset.
    pub fn params(&self) -> EncoderParams {
        EncoderParams::audio(self.bitrate)
    }
}
