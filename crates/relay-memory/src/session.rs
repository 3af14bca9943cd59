use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::now_epoch_ms;

const ACTIVE_WINDOW_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One role-tagged exchange unit in a conversation. `created_at_ms` is set at
/// insertion and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Default)]
struct Conversation {
    turns: VecDeque<Turn>,
    last_activity_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub conversations: usize,
    pub turns: usize,
    pub active_last_hour: usize,
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("no conversation found for channel '{channel}'")]
    UnknownChannel { channel: String },
    #[error("transcript is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Transcript {
    channel_key: String,
    turns: Vec<Turn>,
    exported_at_ms: i64,
}

/// Bounded, ordered per-channel conversation history. All state lives in one
/// map behind a single coarse lock; conversations are created lazily on first
/// append and removed by `clear` or an idle sweep. Process-lifetime only.
#[derive(Debug)]
pub struct SessionStore {
    max_history: usize,
    inner: Mutex<HashMap<String, Conversation>>,
}

impl SessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        // The map stays consistent even if another caller panicked mid-hold.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, channel_key: &str, role: Role, content: &str) {
        self.append_at(channel_key, role, content, now_epoch_ms());
    }

    pub fn append_at(&self, channel_key: &str, role: Role, content: &str, now_ms: i64) {
        debug_assert!(!channel_key.is_empty(), "channel key must be non-empty");
        let mut map = self.guard();
        let conversation = map.entry(channel_key.to_string()).or_default();
        conversation.turns.push_back(Turn {
            role,
            content: content.to_string(),
            created_at_ms: now_ms,
        });
        conversation.last_activity_ms = now_ms;
        // Steady-state FIFO: one insert past the cap evicts exactly one turn.
        while conversation.turns.len() > self.max_history {
            conversation.turns.pop_front();
        }
        debug!(channel = channel_key, role = role.as_str(), "turn appended");
    }

    /// Snapshot copy of up to `limit` most recent turns, oldest-first.
    /// An unseen channel yields an empty vec, not an error.
    pub fn history(&self, channel_key: &str, limit: Option<usize>) -> Vec<Turn> {
        let map = self.guard();
        let Some(conversation) = map.get(channel_key) else {
            return Vec::new();
        };
        let take = limit
            .unwrap_or(conversation.turns.len())
            .min(conversation.turns.len());
        let skip = conversation.turns.len() - take;
        conversation.turns.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self, channel_key: &str) {
        let mut map = self.guard();
        if map.remove(channel_key).is_some() {
            info!(channel = channel_key, "conversation cleared");
        }
    }

    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(max_age, now_epoch_ms())
    }

    /// Removes every conversation idle for `max_age` or longer. The boundary
    /// value counts as expired: a conversation last touched exactly `max_age`
    /// ago is removed.
    pub fn sweep_at(&self, max_age: Duration, now_ms: i64) -> usize {
        let cutoff_ms = now_ms.saturating_sub(max_age.as_millis() as i64);
        let mut map = self.guard();
        let before = map.len();
        map.retain(|_, conversation| conversation.last_activity_ms > cutoff_ms);
        let removed = before - map.len();
        if removed > 0 {
            info!(removed, "swept idle conversations");
        }
        removed
    }

    pub fn stats(&self) -> StoreStats {
        self.stats_at(now_epoch_ms())
    }

    pub fn stats_at(&self, now_ms: i64) -> StoreStats {
        let map = self.guard();
        StoreStats {
            conversations: map.len(),
            turns: map.values().map(|c| c.turns.len()).sum(),
            active_last_hour: map
                .values()
                .filter(|c| now_ms - c.last_activity_ms < ACTIVE_WINDOW_MS)
                .count(),
        }
    }

    pub fn export(&self, channel_key: &str) -> Result<String, TranscriptError> {
        let map = self.guard();
        let conversation =
            map.get(channel_key)
                .ok_or_else(|| TranscriptError::UnknownChannel {
                    channel: channel_key.to_string(),
                })?;
        let transcript = Transcript {
            channel_key: channel_key.to_string(),
            turns: conversation.turns.iter().cloned().collect(),
            exported_at_ms: now_epoch_ms(),
        };
        Ok(serde_json::to_string_pretty(&transcript)?)
    }

    /// Replaces the channel's conversation from an exported transcript and
    /// stamps fresh activity. Turns beyond `max_history` are dropped from the
    /// front so the cap invariant holds. Returns the retained turn count.
    pub fn import(&self, channel_key: &str, json: &str) -> Result<usize, TranscriptError> {
        let transcript: Transcript = serde_json::from_str(json)?;
        let mut turns: VecDeque<Turn> = transcript.turns.into();
        while turns.len() > self.max_history {
            turns.pop_front();
        }
        let retained = turns.len();
        let mut map = self.guard();
        map.insert(
            channel_key.to_string(),
            Conversation {
                turns,
                last_activity_ms: now_epoch_ms(),
            },
        );
        info!(channel = channel_key, retained, "transcript imported");
        Ok(retained)
    }
}
