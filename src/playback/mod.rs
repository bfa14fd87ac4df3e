//! Playback sessions: which encoder run serves which player.

mod manager;

pub use manager::{
    should_throttle, start_cleanup_task, PlaybackConfig, PlaybackLease, PlaybackManager,
    PlaybackSessionKey, SegmentRequest, ShutdownSummary, DEFAULT_REUSE_WINDOW,
    DEFAULT_THROTTLE_AHEAD,
};
