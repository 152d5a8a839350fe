//! Integration tests for the debouncer and poller.
//!
//! Every async test runs with `start_paused = true`: tokio auto-advances the
//! clock when the runtime is idle, so `sleep_until` resolves at exactly its
//! deadline and elapsed times can be compared for equality.

use std::time::Duration;

use realmlink_timer::{DebounceConfig, Debouncer, Poller};
use tokio::time::{Instant, advance, timeout};

// =========================================================================
// Helpers
// =========================================================================

fn debouncer(window_s: u64, max_wait_s: u64) -> Debouncer {
    Debouncer::new(DebounceConfig {
        window: Duration::from_secs(window_s),
        max_wait: Duration::from_secs(max_wait_s),
    })
}

// =========================================================================
// DebounceConfig
// =========================================================================

#[test]
fn test_default_config_three_second_window() {
    let cfg = DebounceConfig::default();
    assert_eq!(cfg.window, Duration::from_secs(3));
    assert!(cfg.max_wait >= cfg.window);
}

#[test]
fn test_validated_raises_max_wait_to_window() {
    let cfg = DebounceConfig {
        window: Duration::from_secs(5),
        max_wait: Duration::from_secs(1),
    }
    .validated();
    assert_eq!(cfg.max_wait, Duration::from_secs(5));
}

#[test]
fn test_validated_clamps_zero_window() {
    let cfg = DebounceConfig {
        window: Duration::ZERO,
        max_wait: Duration::ZERO,
    }
    .validated();
    assert_eq!(cfg.window, DebounceConfig::MIN_WINDOW);
    assert_eq!(cfg.max_wait, DebounceConfig::MIN_WINDOW);
}

// =========================================================================
// Debouncer
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_clean_debouncer_never_flushes() {
    let mut d = debouncer(3, 10);
    assert!(!d.is_dirty());
    assert!(d.deadline().is_none());
    let waited = timeout(Duration::from_secs(60), d.wait_for_flush()).await;
    assert!(waited.is_err(), "nothing to flush");
}

#[tokio::test(start_paused = true)]
async fn test_single_mark_flushes_after_window() {
    let mut d = debouncer(3, 10);
    let start = Instant::now();
    d.mark_dirty();

    let flush = d.wait_for_flush().await;
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(flush.marks, 1);
    assert!(!flush.forced);
    assert!(!d.is_dirty());
    assert_eq!(d.flush_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_marks_within_window_coalesce() {
    let mut d = debouncer(3, 10);
    let start = Instant::now();
    d.mark_dirty();
    advance(Duration::from_secs(2)).await;
    d.mark_dirty();
    advance(Duration::from_secs(2)).await;
    d.mark_dirty();

    let flush = d.wait_for_flush().await;
    assert_eq!(start.elapsed(), Duration::from_secs(7), "trailing edge");
    assert_eq!(flush.marks, 3);
    assert_eq!(flush.waited, Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_forces_flush() {
    let mut d = debouncer(3, 5);
    let start = Instant::now();
    d.mark_dirty();
    advance(Duration::from_secs(2)).await;
    d.mark_dirty();
    advance(Duration::from_secs(2)).await;
    d.mark_dirty();

    let flush = d.wait_for_flush().await;
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert!(flush.forced);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_keeps_marks() {
    let mut d = debouncer(3, 10);
    d.mark_dirty();
    let early = timeout(Duration::from_secs(1), d.wait_for_flush()).await;
    assert!(early.is_err());
    assert!(d.is_dirty(), "a dropped wait must not lose the mark");

    let flush = d.wait_for_flush().await;
    assert_eq!(flush.marks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_now_and_cancel() {
    let mut d = debouncer(3, 10);
    assert!(d.flush_now().is_none());

    d.mark_dirty();
    let flush = d.flush_now().unwrap();
    assert_eq!(flush.marks, 1);
    assert!(!d.is_dirty());

    d.mark_dirty();
    d.cancel();
    assert!(!d.is_dirty());
    assert_eq!(d.flush_count(), 1);
}

// =========================================================================
// Poller
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_poller_first_tick_immediate_then_periodic() {
    let mut p = Poller::new(Duration::from_secs(10));
    let start = Instant::now();

    assert_eq!(p.tick().await, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(p.tick().await, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(p.tick().await, 3);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_poller_pause_pends_and_resume_fires() {
    let mut p = Poller::new(Duration::from_secs(10));
    p.tick().await;

    p.pause();
    p.pause();
    assert!(p.is_paused());
    assert!(timeout(Duration::from_secs(60), p.tick()).await.is_err());
    assert_eq!(p.poll_count(), 1);

    p.resume();
    let before = Instant::now();
    assert_eq!(p.tick().await, 2);
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_poller_skips_missed_ticks() {
    let mut p = Poller::new(Duration::from_secs(10));
    p.tick().await;
    advance(Duration::from_secs(35)).await;

    // One late tick, not three bunched ones.
    assert_eq!(p.tick().await, 2);
    let before = Instant::now();
    p.tick().await;
    assert!(before.elapsed() > Duration::ZERO);
}
