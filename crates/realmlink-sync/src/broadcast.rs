//! Sequenced sending and acknowledgement.
//!
//! Each peer numbers its own outgoing `action` and `full_sync` frames from
//! one counter. Every numbered frame waits in [`PendingAcks`] until the
//! remote returns an `ack` with the same sequence. Frames that go
//! unacknowledged for [`AckPolicy::timeout`] are re-sent, at most
//! [`AckPolicy::max_retries`] times; after that they stay in the pending set
//! as unacknowledged until the next full-sync baseline clears it.
//!
//! The receiving side keeps a [`ReceiveWindow`] so a re-sent frame is
//! acknowledged again but applied only once.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use realmlink_protocol::{ActionRecord, Message, SerializedGameState};
use tokio::time::{self, Instant};

// ---------------------------------------------------------------------------
// AckPolicy
// ---------------------------------------------------------------------------

/// Retransmit policy for unacknowledged frames.
#[derive(Debug, Clone)]
pub struct AckPolicy {
    /// How long to wait for an `ack` before re-sending. Default: 5 s.
    pub timeout: Duration,
    /// Re-sends before a frame is given up on. Default: 2.
    pub max_retries: u32,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

impl AckPolicy {
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(50);

    /// Clamp and fix any out-of-range values so the policy is safe to use.
    pub fn validated(mut self) -> Self {
        if self.timeout < Self::MIN_TIMEOUT {
            tracing::warn!(
                timeout = ?self.timeout,
                min = ?Self::MIN_TIMEOUT,
                "ack timeout too short, clamping"
            );
            self.timeout = Self::MIN_TIMEOUT;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// PendingAcks
// ---------------------------------------------------------------------------

/// A sent frame still waiting for its `ack`.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub frame: Message,
    pub sent_at: Instant,
    pub retries: u32,
    /// Retries are used up; the entry is kept only for visibility.
    pub exhausted: bool,
}

/// Sequences sent locally with no `ack` yet, in sequence order.
#[derive(Debug, Clone, Default)]
pub struct PendingAcks {
    entries: BTreeMap<u64, PendingEntry>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sequence: u64, frame: Message, sent_at: Instant) {
        self.entries.insert(
            sequence,
            PendingEntry {
                frame,
                sent_at,
                retries: 0,
                exhausted: false,
            },
        );
    }

    /// Removes `sequence`. Returns `false` if it wasn't pending.
    pub fn ack(&mut self, sequence: u64) -> bool {
        self.entries.remove(&sequence).is_some()
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.entries.contains_key(&sequence)
    }

    pub fn get(&self, sequence: u64) -> Option<&PendingEntry> {
        self.entries.get(&sequence)
    }

    /// Pending sequence numbers, ascending.
    pub fn sequences(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    /// Sequences whose retries are used up.
    pub fn unacknowledged(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, e)| e.exhausted)
            .map(|(seq, _)| *seq)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// The sending half: numbers frames, tracks acks, schedules re-sends.
///
/// The broadcaster only builds frames; the peer loop writes them to the
/// transport.
#[derive(Debug)]
pub struct Broadcaster {
    last_sequence: u64,
    pending: PendingAcks,
    policy: AckPolicy,
}

impl Broadcaster {
    pub fn new(policy: AckPolicy) -> Self {
        Self {
            last_sequence: 0,
            pending: PendingAcks::new(),
            policy: policy.validated(),
        }
    }

    pub fn policy(&self) -> &AckPolicy {
        &self.policy
    }

    /// The last sequence handed out. 0 before anything was sent.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn pending(&self) -> &PendingAcks {
        &self.pending
    }

    /// Builds the `action` frame for a named mutation and marks it pending.
    pub fn broadcast_action(
        &mut self,
        name: &str,
        payload: serde_json::Value,
        timestamp: u64,
    ) -> Message {
        self.broadcast_record(ActionRecord {
            name: name.to_string(),
            payload,
            timestamp,
        })
    }

    pub fn broadcast_record(&mut self, action: ActionRecord) -> Message {
        let sequence = self.next_sequence();
        let frame = Message::Action { action, sequence };
        self.track(sequence, frame)
    }

    /// Builds a `full_sync` frame. It shares the action counter.
    pub fn full_sync(&mut self, state: SerializedGameState) -> Message {
        let sequence = self.next_sequence();
        let frame = Message::FullSync {
            state: Box::new(state),
            sequence,
        };
        self.track(sequence, frame)
    }

    /// Handles an inbound `ack`. Returns `false` for an unknown sequence.
    pub fn on_ack(&mut self, sequence: u64) -> bool {
        let known = self.pending.ack(sequence);
        if known {
            tracing::trace!(sequence, pending = self.pending.len(), "ack");
        } else {
            tracing::debug!(sequence, "ack for unknown sequence");
        }
        known
    }

    /// When the next re-send is due, if any frame is still retryable.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.pending
            .entries
            .values()
            .filter(|e| !e.exhausted)
            .map(|e| e.sent_at + self.policy.timeout)
            .min()
    }

    /// Waits until a re-send is due. Pends forever while nothing is
    /// retryable. Cancel-safe: call [`due_retries`](Self::due_retries)
    /// afterwards to collect the frames.
    pub async fn wait_for_retry(&self) {
        match self.next_retry_at() {
            Some(at) => time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Frames to re-send at `now`. Entries past their last retry are marked
    /// exhausted and logged instead.
    pub fn due_retries(&mut self, now: Instant) -> Vec<Message> {
        let mut frames = Vec::new();
        for (sequence, entry) in &mut self.pending.entries {
            if entry.exhausted || now < entry.sent_at + self.policy.timeout {
                continue;
            }
            if entry.retries >= self.policy.max_retries {
                entry.exhausted = true;
                tracing::warn!(sequence, retries = entry.retries, "frame unacknowledged");
                continue;
            }
            entry.retries += 1;
            entry.sent_at = now;
            tracing::debug!(sequence, retry = entry.retries, "re-sending frame");
            frames.push(entry.frame.clone());
        }
        frames
    }

    /// Drops every pending entry. Used when a reconnect establishes a new
    /// baseline; sequences keep counting up.
    pub fn reset_baseline(&mut self) {
        if !self.pending.is_empty() {
            tracing::info!(abandoned = self.pending.len(), "pending frames abandoned");
        }
        self.pending.clear();
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    fn track(&mut self, sequence: u64, frame: Message) -> Message {
        self.pending.insert(sequence, frame.clone(), Instant::now());
        frame
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(AckPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

/// Whether an inbound sequenced frame should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    New,
    /// Seen before: acknowledge again, don't apply.
    Duplicate,
}

/// Sequences already received from the remote.
///
/// Keeps the most recent [`ReceiveWindow::CAPACITY`] sequences exactly;
/// anything at or below the oldest evicted one counts as a duplicate.
#[derive(Debug, Clone, Default)]
pub struct ReceiveWindow {
    seen: BTreeSet<u64>,
    floor: Option<u64>,
}

impl ReceiveWindow {
    pub const CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, sequence: u64) -> Delivery {
        if self.floor.is_some_and(|f| sequence <= f) || !self.seen.insert(sequence) {
            return Delivery::Duplicate;
        }
        while self.seen.len() > Self::CAPACITY {
            self.floor = self.seen.pop_first();
        }
        Delivery::New
    }

    /// Forgets everything. Called when the remote says `hello`, since a
    /// reloaded remote may start numbering again.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.floor = None;
    }
}
