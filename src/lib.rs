//! Reelforge - Adaptive transcode and playback session engine
//!
//! Serves HLS and DASH for media files on demand, running one encoder
//! process per active playback session. The library crate exposes the
//! engine for integration testing.

pub mod config;
pub mod playback;
pub mod server;
pub mod streaming;
pub mod transcode;
