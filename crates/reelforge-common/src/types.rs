//! Probed stream facts shared across the engine.
//!
//! [`Stream`] is written into the external catalog next to its
//! [`StreamKey`](crate::StreamKey), so fields are append-only. New fields must
//! carry `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Type of media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Subtitle stream.
    Subtitle,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// A rational number, used for time bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    /// Numerator.
    pub num: i64,
    /// Denominator.
    pub den: i64,
}

impl Rational {
    /// Create a rational.
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Floating point value, zero when the denominator is zero.
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// True when either side is zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0 || self.den == 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = Error;

    /// Parse `"30000/1001"` or a bare integer like `"25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Validation(format!("invalid rational: {s}"));
        match s.split_once('/') {
            Some((num, den)) => Ok(Self::new(
                num.trim().parse().map_err(|_| invalid())?,
                den.trim().parse().map_err(|_| invalid())?,
            )),
            None => Ok(Self::new(s.trim().parse().map_err(|_| invalid())?, 1)),
        }
    }
}

/// Technical facts about one elementary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Container-level stream index.
    pub index: u32,
    /// Total duration in seconds.
    pub duration: f64,
    /// Tick unit of timestamps in this stream.
    pub time_base: Rational,
    /// Total duration in `time_base` ticks.
    pub duration_ticks: i64,
    /// Codec signalling string (`avc1.640028`, `mp4a.40.2`, `wvtt`).
    pub codec: String,
    /// Short codec name as reported by the inspection tool (`h264`, `aac`).
    pub codec_name: String,
    /// Bitrate in bits per second.
    pub bitrate: u64,
    /// Average frame rate, zero for non-video streams.
    #[serde(default)]
    pub frame_rate: Rational,
    /// Width in pixels, zero for non-video streams.
    #[serde(default)]
    pub width: u32,
    /// Height in pixels, zero for non-video streams.
    #[serde(default)]
    pub height: u32,
    /// Kind of stream.
    pub stream_type: StreamType,
    /// ISO 639 language tag.
    #[serde(default)]
    pub language: Option<String>,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Whether the container marks this track as default.
    #[serde(default)]
    pub default: bool,
}

impl Stream {
    /// Convert stream ticks to seconds.
    pub fn ticks_to_secs(&self, ticks: i64) -> f64 {
        ticks as f64 * self.time_base.as_f64()
    }

    /// Convert seconds to stream ticks, rounding down.
    pub fn secs_to_ticks(&self, secs: f64) -> i64 {
        if self.time_base.num == 0 {
            return 0;
        }
        (secs * self.time_base.den as f64 / self.time_base.num as f64).floor() as i64
    }

    /// Whether this is a video stream.
    pub fn is_video(&self) -> bool {
        self.stream_type == StreamType::Video
    }
}
