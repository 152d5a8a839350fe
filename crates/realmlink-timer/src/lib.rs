//! Timers for the Realmlink peer loop.
//!
//! Two small schedulers, both built on tokio's clock so tests can run them
//! under `start_paused`:
//!
//! - [`Debouncer`]: trailing-edge flush for persistence. Every mutation
//!   marks it dirty; the flush fires once the marks stop for `window`, or
//!   after `max_wait` from the first mark, whichever comes first.
//! - [`Poller`]: fixed-interval ticks, used for the public lobby list.
//!
//! # Integration
//!
//! Both sit inside the peer actor's `tokio::select!` loop. Their wait
//! methods pend forever when there is nothing to do, and are cancel-safe:
//! nothing changes until the timer has actually fired.
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { state.apply(..); saves.mark_dirty(); }
//!         flush = saves.wait_for_flush() => persist(&state, flush),
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`Debouncer`].
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Quiet period after the last mark before flushing. Default: 3 s.
    pub window: Duration,
    /// Longest a dirty mark may wait, however busy the caller is.
    /// Default: 10 s.
    pub max_wait: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl DebounceConfig {
    /// Shortest accepted window.
    pub const MIN_WINDOW: Duration = Duration::from_millis(1);

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Debouncer::new`]. Rules:
    /// - `window` at least [`Self::MIN_WINDOW`].
    /// - `max_wait` at least `window`.
    pub fn validated(mut self) -> Self {
        if self.window < Self::MIN_WINDOW {
            warn!(window = ?self.window, "debounce window too small, clamping");
            self.window = Self::MIN_WINDOW;
        }
        if self.max_wait < self.window {
            warn!(
                max_wait = ?self.max_wait,
                window = ?self.window,
                "max_wait shorter than window, raising it"
            );
            self.max_wait = self.window;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Returned by [`Debouncer::wait_for_flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    /// How many marks this flush coalesced.
    pub marks: u32,
    /// Time from the first mark to the flush.
    pub waited: Duration,
    /// `true` if `max_wait` forced the flush before the window went quiet.
    pub forced: bool,
}

/// Trailing-edge debouncer with a maximum wait.
#[derive(Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    first_mark: Option<Instant>,
    last_mark: Option<Instant>,
    marks: u32,
    flushes: u64,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config: config.validated(),
            first_mark: None,
            last_mark: None,
            marks: 0,
            flushes: 0,
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Records a change that needs flushing.
    pub fn mark_dirty(&mut self) {
        let now = Instant::now();
        self.first_mark.get_or_insert(now);
        self.last_mark = Some(now);
        self.marks = self.marks.saturating_add(1);
    }

    pub fn is_dirty(&self) -> bool {
        self.first_mark.is_some()
    }

    /// Total flushes fired so far, including [`flush_now`](Self::flush_now).
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// When the pending flush is due, if anything is dirty.
    pub fn deadline(&self) -> Option<Instant> {
        let (first, last) = (self.first_mark?, self.last_mark?);
        Some((last + self.config.window).min(first + self.config.max_wait))
    }

    /// Waits until the pending flush is due, then clears the dirty state.
    ///
    /// While clean this future pends forever; `tokio::select!` still drives
    /// the other branches, and a later call picks up new marks.
    pub async fn wait_for_flush(&mut self) -> Flush {
        let Some(deadline) = self.deadline() else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(deadline).await;
        self.take_flush()
    }

    /// Flushes immediately if dirty, e.g. before the transport closes.
    pub fn flush_now(&mut self) -> Option<Flush> {
        self.is_dirty().then(|| self.take_flush())
    }

    /// Drops pending marks without flushing.
    pub fn cancel(&mut self) {
        if self.is_dirty() {
            debug!(marks = self.marks, "pending flush cancelled");
        }
        self.first_mark = None;
        self.last_mark = None;
        self.marks = 0;
    }

    fn take_flush(&mut self) -> Flush {
        let now = Instant::now();
        let first = self.first_mark.unwrap_or(now);
        let quiet_at = self.last_mark.map(|l| l + self.config.window);
        let flush = Flush {
            marks: self.marks,
            waited: now.saturating_duration_since(first),
            forced: quiet_at.is_some_and(|q| now < q),
        };
        self.first_mark = None;
        self.last_mark = None;
        self.marks = 0;
        self.flushes += 1;
        trace!(marks = flush.marks, forced = flush.forced, "flush due");
        flush
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Fixed-interval ticker. The first tick fires immediately.
///
/// Missed ticks are skipped rather than bunched: a slow poll does not cause
/// a burst of catch-up requests.
#[derive(Debug)]
pub struct Poller {
    interval: Interval,
    period: Duration,
    polls: u64,
    paused: bool,
}

impl Poller {
    /// Creates a poller. `period` is clamped to at least 1 ms.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(period_ms = period.as_millis() as u64, "poller created");
        Self {
            interval,
            period,
            polls: 0,
            paused: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick and returns its 1-based number. Pends forever
    /// while paused.
    pub async fn tick(&mut self) -> u64 {
        if self.paused {
            std::future::pending::<()>().await;
        }
        self.interval.tick().await;
        self.polls += 1;
        trace!(poll = self.polls, "poll");
        self.polls
    }

    /// Pause polling. Safe to call multiple times.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(polls = self.polls, "poller paused");
        }
    }

    /// Resume polling. The next tick fires immediately.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.interval.reset_immediately();
            debug!(polls = self.polls, "poller resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn poll_count(&self) -> u64 {
        self.polls
    }
}
