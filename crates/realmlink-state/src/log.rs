//! Per-peer match log. Never transmitted: each peer derives its own
//! entries from what it sends and receives.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use realmlink_protocol::Slot;

/// Milliseconds since the Unix epoch, as carried in message timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Chat,
    Roll,
    System,
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Canonical slot of the author, `None` for system lines.
    pub player: Option<Slot>,
    pub nickname: Option<String>,
    pub message: String,
}

/// Append-only list of [`LogEntry`].
#[derive(Debug, Clone, Default)]
pub struct MatchLog {
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl MatchLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        kind: LogKind,
        player: Option<Slot>,
        nickname: Option<&str>,
        message: impl Into<String>,
    ) -> &LogEntry {
        self.next_id += 1;
        self.entries.push(LogEntry {
            id: self.next_id,
            timestamp: unix_millis(),
            kind,
            player,
            nickname: nickname.map(str::to_string),
            message: message.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn system(&mut self, message: impl Into<String>) -> &LogEntry {
        self.push(LogKind::System, None, None, message)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
