//! RFC 6381 codec signalling strings derived from inspection output.

use reelforge_common::StreamType;

/// Build the codec string players expect in `CODECS=` and `codecs=`.
///
/// Unknown codecs pass their short name through unchanged so capability
/// filtering can still match on it.
pub fn codec_string(
    stream_type: StreamType,
    codec_name: &str,
    profile: Option<&str>,
    level: Option<i32>,
) -> String {
    match stream_type {
        StreamType::Video => video_codec_string(codec_name, profile, level),
        StreamType::Audio => audio_codec_string(codec_name, profile),
        StreamType::Subtitle => "wvtt".to_string(),
    }
}

fn video_codec_string(codec_name: &str, profile: Option<&str>, level: Option<i32>) -> String {
    match codec_name.to_lowercase().as_str() {
        "h264" | "avc" | "avc1" => {
            let (profile_idc, constraints) = h264_profile(profile.unwrap_or("High"));
            let level = level.filter(|l| *l > 0).unwrap_or(40);
            format!("avc1.{profile_idc:02x}{constraints:02x}{level:02x}")
        }
        "h265" | "hevc" | "hvc1" => {
            let level = level.filter(|l| *l > 0).unwrap_or(93);
            match profile.map(str::to_lowercase).as_deref() {
                Some("main 10") => format!("hvc1.2.4.L{level}.B0"),
                _ => format!("hvc1.1.6.L{level}.B0"),
            }
        }
        "av1" => "av01.0.08M.08".to_string(),
        "vp9" => "vp09.00.10.08".to_string(),
        other => other.to_string(),
    }
}

/// `(profile_idc, constraint flags)` for an H.264 profile name.
fn h264_profile(profile: &str) -> (u8, u8) {
    match profile.to_lowercase().as_str() {
        "constrained baseline" => (0x42, 0xe0),
        "baseline" => (0x42, 0x00),
        "main" => (0x4d, 0x40),
        "extended" => (0x58, 0x00),
        "high 10" => (0x6e, 0x00),
        "high 4:2:2" => (0x7a, 0x00),
        "high 4:4:4 predictive" => (0xf4, 0x00),
        _ => (0x64, 0x00),
    }
}

fn audio_codec_string(codec_name: &str, profile: Option<&str>) -> String {
    match codec_name.to_lowercase().as_str() {
        "aac" => match profile.map(str::to_lowercase).as_deref() {
            Some("he-aac") => "mp4a.40.5".to_string(),
            Some("he-aacv2") => "mp4a.40.29".to_string(),
            _ => "mp4a.40.2".to_string(),
        },
        "ac3" => "ac-3".to_string(),
        "eac3" | "e-ac3" => "ec-3".to_string(),
        "opus" => "Opus".to_string(),
        "flac" => "fLaC".to_string(),
        "mp3" => "mp4a.40.34".to_string(),
        other => other.to_string(),
    }
}
