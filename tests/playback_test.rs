//! Integration tests for the playback session table: reuse, restart,
//! throttling, idle cleanup and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{eventually, EncoderBehavior, TestHarness, SUBTITLE, VIDEO};
use reelforge::config::Config;
use reelforge::playback::{PlaybackLease, PlaybackSessionKey, SegmentRequest};
use reelforge::streaming::wait_for_segment;
use reelforge::transcode::ProgressReport;
use reelforge_common::Error;

const LADDER: &str = "720p/2000kbps";

async fn acquire(h: &TestHarness, key: &PlaybackSessionKey, request: SegmentRequest) -> PlaybackLease {
    let sr = h.stream_rep(key.stream.stream_index, &key.representation.to_string()).await;
    h.ctx
        .playback
        .acquire(key, request, &sr, &h.source())
        .await
        .expect("acquire failed")
}

// ---------------------------------------------------------------------------
// Reuse window
// ---------------------------------------------------------------------------

fn handoff_config(millis: u64) -> Config {
    let mut config = Config::default();
    config.transcode.init_handoff_ms = millis;
    config
}

#[tokio::test]
async fn init_then_seek_starts_one_run_at_seek_target() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");

    let init = acquire(&h, &key, SegmentRequest::Init).await;
    assert!(init.is_pending());
    assert_eq!(h.launcher.launch_count(), 0);

    let media = acquire(&h, &key, SegmentRequest::Media(30)).await;
    let init = h.ctx.playback.bind(init).await.unwrap();

    assert!(Arc::ptr_eq(init.session().unwrap(), media.session().unwrap()));
    assert_eq!(h.launcher.launch_count(), 1);
    assert_eq!(h.launcher.start_segments(), vec![30]);
    assert_eq!(h.launcher.termination_count(), 0);

    let ready = wait_for_segment(&init, SegmentRequest::Init, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(ready.path.ends_with("init.mp4"));
}

#[tokio::test]
async fn waiting_init_is_bound_by_later_media_request() {
    let h = Arc::new(TestHarness::new());
    let key = h.key(VIDEO, LADDER, "player-1");

    let init = acquire(&h, &key, SegmentRequest::Init).await;
    let waiter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.ctx.playback.bind(init).await })
    };
    tokio::task::yield_now().await;

    let media = acquire(&h, &key, SegmentRequest::Media(12)).await;
    let init = tokio::time::timeout(Duration::from_millis(500), waiter)
        .await
        .expect("init stayed pending after the media request")
        .unwrap()
        .unwrap();

    assert!(Arc::ptr_eq(init.session().unwrap(), media.session().unwrap()));
    assert_eq!(h.launcher.start_segments(), vec![12]);
}

#[tokio::test]
async fn lone_init_starts_at_beginning_after_handoff() {
    let h = TestHarness::with_config(handoff_config(50), EncoderBehavior::Produce(4));
    let key = h.key(VIDEO, LADDER, "player-1");

    let init = acquire(&h, &key, SegmentRequest::Init).await;
    let init = h.ctx.playback.bind(init).await.unwrap();
    assert!(!init.is_pending());
    assert_eq!(h.launcher.start_segments(), vec![0]);

    let first = acquire(&h, &key, SegmentRequest::Media(0)).await;
    assert!(Arc::ptr_eq(init.session().unwrap(), first.session().unwrap()));
    assert_eq!(h.launcher.launch_count(), 1);
}

#[tokio::test]
async fn init_reuses_running_session() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");

    let media = acquire(&h, &key, SegmentRequest::Media(20)).await;
    let init = acquire(&h, &key, SegmentRequest::Init).await;

    assert!(!init.is_pending());
    assert!(Arc::ptr_eq(init.session().unwrap(), media.session().unwrap()));
    assert_eq!(h.launcher.launch_count(), 1);
}

#[tokio::test]
async fn variant_switch_starts_at_player_position() {
    let h = TestHarness::with_config(handoff_config(50), EncoderBehavior::Produce(4));
    let current = h.key(VIDEO, LADDER, "player-1");
    let switched = h.key(VIDEO, "480p/1000kbps", "player-1");
    let other_player = h.key(VIDEO, "480p/1000kbps", "player-2");

    let _playing = acquire(&h, &current, SegmentRequest::Media(30)).await;

    let init = acquire(&h, &switched, SegmentRequest::Init).await;
    let init = h.ctx.playback.bind(init).await.unwrap();
    assert_eq!(init.session().unwrap().start_segment(), 30);

    let next = acquire(&h, &switched, SegmentRequest::Media(31)).await;
    assert!(Arc::ptr_eq(init.session().unwrap(), next.session().unwrap()));

    // Another player's position is not a hint
    let init = acquire(&h, &other_player, SegmentRequest::Init).await;
    let init = h.ctx.playback.bind(init).await.unwrap();
    assert_eq!(init.session().unwrap().start_segment(), 0);
    assert_eq!(h.launcher.start_segments(), vec![30, 30, 0]);
}

#[tokio::test]
async fn shutdown_fails_pending_init() {
    let h = Arc::new(TestHarness::with_config(
        handoff_config(10_000),
        EncoderBehavior::Produce(4),
    ));
    let key = h.key(VIDEO, LADDER, "player-1");

    let init = acquire(&h, &key, SegmentRequest::Init).await;
    let waiter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.ctx.playback.bind(init).await })
    };
    tokio::task::yield_now().await;

    h.ctx.playback.destroy_all(Duration::from_secs(1)).await;
    let err = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("pending init not released by shutdown")
        .unwrap()
        .unwrap_err();
    assert_matches!(err, Error::SegmentNotFound { ref segment } if segment == "init");
    assert_eq!(h.launcher.launch_count(), 0);
}

#[tokio::test]
async fn forward_request_inside_window_reuses_session() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(10)).await;
    let ahead = acquire(&h, &key, SegmentRequest::Media(15)).await;

    assert!(Arc::ptr_eq(first.session().unwrap(), ahead.session().unwrap()));
    assert_eq!(h.launcher.start_segments(), vec![10]);
}

#[tokio::test]
async fn forward_jump_past_window_restarts() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(10)).await;
    let jumped = acquire(&h, &key, SegmentRequest::Media(16)).await;

    assert!(!Arc::ptr_eq(first.session().unwrap(), jumped.session().unwrap()));
    assert!(first.session().unwrap().is_destroyed());
    assert_eq!(h.launcher.start_segments(), vec![10, 16]);
    let old_dir = first.session().unwrap().output_dir().to_path_buf();
    assert!(eventually(|| !old_dir.exists()).await);
    assert_eq!(h.launcher.termination_count(), 1);
}

#[tokio::test]
async fn backward_seek_restarts() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(10)).await;
    let behind = acquire(&h, &key, SegmentRequest::Media(9)).await;

    assert!(first.session().unwrap().is_destroyed());
    assert_eq!(behind.session().unwrap().start_segment(), 9);
    assert_eq!(h.launcher.start_segments(), vec![10, 9]);
    assert!(eventually(|| h.session_dirs() == 1).await);
}

#[tokio::test]
async fn restart_does_not_wait_for_old_run_teardown() {
    let h = TestHarness::new();
    h.launcher.set_terminate_delay(Duration::from_secs(1));
    let key = h.key(VIDEO, LADDER, "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(10)).await;
    let quick = Duration::from_millis(300);
    let jumped = tokio::time::timeout(quick, acquire(&h, &key, SegmentRequest::Media(40)))
        .await
        .expect("restart blocked on teardown");
    assert!(first.session().unwrap().is_destroyed());

    // The entry is free while the old encoder is still stopping
    let next = tokio::time::timeout(quick, acquire(&h, &key, SegmentRequest::Media(41)))
        .await
        .expect("entry held during teardown");
    assert!(Arc::ptr_eq(jumped.session().unwrap(), next.session().unwrap()));

    let old_dir = first.session().unwrap().output_dir().to_path_buf();
    assert!(eventually(|| !old_dir.exists()).await);
    assert!(eventually(|| h.session_dirs() == 1).await);
}

#[tokio::test]
async fn window_follows_last_request() {
    let mut config = Config::default();
    config.transcode.reuse_window = 3;
    let h = TestHarness::with_config(config, EncoderBehavior::Produce(4));
    let key = h.key(VIDEO, LADDER, "player-1");

    let _a = acquire(&h, &key, SegmentRequest::Media(0)).await;
    let _b = acquire(&h, &key, SegmentRequest::Media(3)).await;
    let _c = acquire(&h, &key, SegmentRequest::Media(6)).await;
    assert_eq!(h.launcher.launch_count(), 1);

    let _d = acquire(&h, &key, SegmentRequest::Media(10)).await;
    assert_eq!(h.launcher.start_segments(), vec![0, 10]);
}

#[tokio::test]
async fn players_do_not_share_sessions() {
    let h = TestHarness::new();
    let a = acquire(&h, &h.key(VIDEO, LADDER, "player-a"), SegmentRequest::Media(0)).await;
    let b = acquire(&h, &h.key(VIDEO, LADDER, "player-b"), SegmentRequest::Media(0)).await;

    assert!(!Arc::ptr_eq(a.session().unwrap(), b.session().unwrap()));
    assert_ne!(a.session().unwrap().output_dir(), b.session().unwrap().output_dir());
    assert_eq!(h.ctx.playback.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_create_one_session() {
    let h = Arc::new(TestHarness::new());
    let key = h.key(VIDEO, LADDER, "player-1");
    let sr = h.stream_rep(VIDEO, LADDER).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let h = Arc::clone(&h);
        let key = key.clone();
        let sr = Arc::clone(&sr);
        tasks.push(tokio::spawn(async move {
            let lease = h
                .ctx
                .playback
                .acquire(&key, SegmentRequest::Media(0), &sr, &h.source())
                .await
                .unwrap();
            lease.session().unwrap().id()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(h.launcher.launch_count(), 1);
    assert_eq!(h.ctx.playback.ref_count(&key), 0);
}

// ---------------------------------------------------------------------------
// Transmux runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transmux_run_is_capped() {
    let h = TestHarness::new();
    let key = h.key(SUBTITLE, "direct", "player-1");
    let lease = acquire(&h, &key, SegmentRequest::Media(20)).await;

    let session = lease.session().unwrap();
    assert_eq!(session.start_segment(), 20);
    assert_eq!(session.end_segment(), 32);
    assert!(session.covers(31));
    assert!(!session.covers(32));
}

#[tokio::test]
async fn request_past_capped_run_restarts() {
    let mut config = Config::default();
    config.transcode.max_transmux_segments = 4;
    config.transcode.reuse_window = 10;
    let h = TestHarness::with_config(config, EncoderBehavior::Produce(4));
    let key = h.key(SUBTITLE, "direct", "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(0)).await;
    let next = acquire(&h, &key, SegmentRequest::Media(4)).await;

    assert!(first.session().unwrap().is_destroyed());
    assert_eq!(next.session().unwrap().start_segment(), 4);
    assert_eq!(next.session().unwrap().end_segment(), 8);
}

// ---------------------------------------------------------------------------
// Segment availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn highest_segment_withheld_until_exit() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");
    let lease = acquire(&h, &key, SegmentRequest::Media(0)).await;

    let available = lease.session().unwrap().available_segments().await.unwrap();
    assert_eq!(available.segments.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(available.highest_on_disk, Some(3));

    h.launcher.exit_last(0);
    let available = lease.session().unwrap().available_segments().await.unwrap();
    assert_eq!(available.segments.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn segments_are_numbered_from_run_start() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");
    let lease = acquire(&h, &key, SegmentRequest::Media(30)).await;

    let ready = wait_for_segment(&lease, SegmentRequest::Media(31), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(ready.path.ends_with("stream0_1.m4s"));
}

#[tokio::test]
async fn exited_run_reused_only_for_written_segments() {
    let h = TestHarness::with_behavior(EncoderBehavior::ProduceAndExit(4));
    let key = h.key(VIDEO, LADDER, "player-1");

    let first = acquire(&h, &key, SegmentRequest::Media(0)).await;
    let written = acquire(&h, &key, SegmentRequest::Media(3)).await;
    assert!(Arc::ptr_eq(first.session().unwrap(), written.session().unwrap()));

    let missing = acquire(&h, &key, SegmentRequest::Media(5)).await;
    assert!(!Arc::ptr_eq(first.session().unwrap(), missing.session().unwrap()));
    assert_eq!(h.launcher.start_segments(), vec![0, 5]);
}

#[tokio::test]
async fn wait_times_out_and_releases_reference() {
    let h = TestHarness::with_behavior(EncoderBehavior::Stall);
    let key = h.key(VIDEO, LADDER, "player-1");

    let lease = acquire(&h, &key, SegmentRequest::Media(0)).await;
    assert_eq!(h.ctx.playback.ref_count(&key), 1);

    let err = wait_for_segment(&lease, SegmentRequest::Media(0), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert_matches!(err, Error::SegmentTimeout { ref segment } if segment == "0");

    drop(lease);
    assert_eq!(h.ctx.playback.ref_count(&key), 0);
}

#[tokio::test]
async fn spawn_failure_leaves_no_session() {
    let h = TestHarness::with_behavior(EncoderBehavior::FailSpawn);
    let key = h.key(VIDEO, LADDER, "player-1");
    let sr = h.stream_rep(VIDEO, LADDER).await;

    let err = h
        .ctx
        .playback
        .acquire(&key, SegmentRequest::Media(0), &sr, &h.source())
        .await
        .unwrap_err();
    assert_matches!(err, Error::SpawnError { .. });
    assert_eq!(h.ctx.playback.ref_count(&key), 0);
    assert!(h.ctx.playback.current_session(&key).await.is_none());
    assert_eq!(h.session_dirs(), 0);
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_throttles_and_serving_resumes() {
    let mut config = Config::default();
    config.transcode.throttle_ahead_segments = 2;
    let h = TestHarness::with_config(config, EncoderBehavior::Produce(8));
    let key = h.key(VIDEO, LADDER, "player-1");

    let lease = acquire(&h, &key, SegmentRequest::Media(0)).await;
    let id = lease.session().unwrap().id();

    let throttled = h.ctx.playback.on_progress(id, ProgressReport::default()).await;
    assert!(throttled);
    assert!(lease.session().unwrap().is_throttled());
    assert!(h.launcher.last_paused());

    // Player catches up to within the threshold
    let ahead = acquire(&h, &key, SegmentRequest::Media(5)).await;
    let ready = wait_for_segment(&ahead, SegmentRequest::Media(5), Duration::from_secs(2))
        .await
        .unwrap();
    ahead.mark_served(5, &ready.available).await;

    assert!(!lease.session().unwrap().is_throttled());
    assert!(!h.launcher.last_paused());
}

#[tokio::test]
async fn progress_below_threshold_keeps_running() {
    let h = TestHarness::with_behavior(EncoderBehavior::Produce(4));
    let key = h.key(VIDEO, LADDER, "player-1");
    let lease = acquire(&h, &key, SegmentRequest::Media(0)).await;

    assert!(!h.ctx.playback.on_progress(lease.session().unwrap().id(), ProgressReport::default()).await);
    assert!(!lease.session().unwrap().is_throttled());
}

#[tokio::test]
async fn waiting_request_resumes_throttled_run() {
    let mut config = Config::default();
    config.transcode.throttle_ahead_segments = 2;
    let h = TestHarness::with_config(config, EncoderBehavior::Produce(8));
    let key = h.key(VIDEO, LADDER, "player-1");

    let lease = acquire(&h, &key, SegmentRequest::Media(0)).await;
    assert!(h.ctx.playback.on_progress(lease.session().unwrap().id(), ProgressReport::default()).await);

    // Segment 7 is still being written; the wait must unpause the encoder
    let err = wait_for_segment(&lease, SegmentRequest::Media(7), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_matches!(err, Error::SegmentTimeout { .. });
    assert!(!lease.session().unwrap().is_throttled());
}

#[tokio::test]
async fn progress_for_replaced_run_is_ignored() {
    let h = TestHarness::with_behavior(EncoderBehavior::Produce(20));
    let key = h.key(VIDEO, LADDER, "player-1");

    let old = acquire(&h, &key, SegmentRequest::Media(0)).await;
    let old_id = old.session().unwrap().id();
    let _new = acquire(&h, &key, SegmentRequest::Media(30)).await;

    assert!(!h.ctx.playback.on_progress(old_id, ProgressReport::default()).await);
}

// ---------------------------------------------------------------------------
// Cleanup and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_sessions_are_destroyed() {
    let mut config = Config::default();
    config.transcode.idle_timeout_secs = 0;
    let h = TestHarness::with_config(config, EncoderBehavior::Produce(4));

    let held_key = h.key(VIDEO, LADDER, "player-held");
    let idle_key = h.key(VIDEO, LADDER, "player-idle");
    let held = acquire(&h, &held_key, SegmentRequest::Media(0)).await;
    let idle = acquire(&h, &idle_key, SegmentRequest::Media(0)).await;
    let idle_session = Arc::clone(idle.session().unwrap());
    drop(idle);

    assert_eq!(h.ctx.playback.cleanup_idle().await, 1);
    assert!(idle_session.is_destroyed());
    assert!(!held.session().unwrap().is_destroyed());
    assert_eq!(h.ctx.playback.len(), 1);
    assert_eq!(h.session_dirs(), 1);
}

#[tokio::test]
async fn recently_used_sessions_survive_cleanup() {
    let h = TestHarness::new();
    let key = h.key(VIDEO, LADDER, "player-1");
    drop(acquire(&h, &key, SegmentRequest::Media(0)).await);

    assert_eq!(h.ctx.playback.cleanup_idle().await, 0);
    assert_eq!(h.ctx.playback.len(), 1);
}

#[tokio::test]
async fn destroy_all_removes_every_session() {
    let h = TestHarness::new();
    drop(acquire(&h, &h.key(VIDEO, LADDER, "player-a"), SegmentRequest::Media(0)).await);
    drop(acquire(&h, &h.key(VIDEO, LADDER, "player-b"), SegmentRequest::Media(0)).await);
    drop(acquire(&h, &h.key(SUBTITLE, "direct", "player-a"), SegmentRequest::Media(0)).await);
    assert_eq!(h.session_dirs(), 3);

    let summary = h.ctx.playback.destroy_all(Duration::from_secs(5)).await;
    assert_eq!(summary.destroyed, 3);
    assert_eq!(summary.leaked, 0);
    assert!(h.ctx.playback.is_empty());
    assert_eq!(h.session_dirs(), 0);
    assert_eq!(h.launcher.termination_count(), 3);
}
