//! Per-conversation history cache
//!
//! Keeps the ordered turns of recently active conversations in memory so a
//! chat request does not reload the whole history from the database.
//! Features:
//! - Least recently used conversation evicted past `max_conversations`
//! - Oldest exchanges dropped past `max_messages` per conversation
//! - Entries idle for `idle_ttl` expire on access
//! - Owner stored with each entry for access checks
//!
//! Entries are only created by [`HistoryCache::seed`]. Appending to a
//! conversation that was evicted or expired is a no-op, so a cached history
//! is always a suffix of the persisted one.

use crate::configuration::CacheSettings;
use crate::models::{ChatMessage, Role};
use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Snapshot of one cached conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHistory {
    pub owner: String,
    pub messages: Vec<ChatMessage>,
}

struct Entry {
    owner: String,
    messages: VecDeque<ChatMessage>,
    last_used: Instant,
}

impl Entry {
    fn snapshot(&self) -> CachedHistory {
        CachedHistory {
            owner: self.owner.clone(),
            messages: self.messages.iter().cloned().collect(),
        }
    }
}

pub struct HistoryCache {
    max_messages: usize,
    idle_ttl: Option<Duration>,
    entries: Mutex<LruCache<Uuid, Entry>>,
}

impl HistoryCache {
    /// `0` disables the corresponding bound.
    pub fn new(max_conversations: usize, max_messages: usize, idle_ttl: Duration) -> Self {
        let entries = match NonZeroUsize::new(max_conversations) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Self {
            max_messages,
            idle_ttl: (!idle_ttl.is_zero()).then_some(idle_ttl),
            entries: Mutex::new(entries),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.max_conversations,
            settings.max_messages,
            Duration::from_secs(settings.idle_ttl_secs),
        )
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.idle_ttl
            .map(|ttl| now.duration_since(entry.last_used) >= ttl)
            .unwrap_or(false)
    }

    /// Drop whole exchanges from the front until the history fits. The
    /// history never starts with a reply.
    fn trim(&self, messages: &mut VecDeque<ChatMessage>) {
        if self.max_messages == 0 || messages.len() <= self.max_messages {
            return;
        }
        while messages.len() > self.max_messages {
            messages.pop_front();
        }
        while messages
            .front()
            .map(|message| message.role == Role::Agent)
            .unwrap_or(false)
        {
            messages.pop_front();
        }
    }

    /// Live entry for `conversation_id`, marked as most recently used.
    /// Expired entries are removed.
    fn live_entry<'a>(
        &self,
        entries: &'a mut LruCache<Uuid, Entry>,
        conversation_id: Uuid,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        let expired = entries
            .peek(&conversation_id)
            .map(|entry| self.is_expired(entry, now))?;
        if expired {
            entries.pop(&conversation_id);
            tracing::debug!(conversation_id = %conversation_id, "Conversation history expired");
            return None;
        }

        let entry = entries.get_mut(&conversation_id)?;
        entry.last_used = now;
        Some(entry)
    }

    /// Ordered history of a conversation, oldest first.
    pub async fn get(&self, conversation_id: Uuid) -> Option<CachedHistory> {
        let mut entries = self.entries.lock().await;
        self.live_entry(&mut entries, conversation_id, Instant::now())
            .map(|entry| entry.snapshot())
    }

    /// Populate an absent entry with persisted history. When another request
    /// got there first its entry wins and is returned unchanged.
    pub async fn seed(
        &self,
        conversation_id: Uuid,
        owner: &str,
        messages: Vec<ChatMessage>,
    ) -> CachedHistory {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = self.live_entry(&mut entries, conversation_id, now) {
            return entry.snapshot();
        }

        let mut messages = VecDeque::from(messages);
        self.trim(&mut messages);
        let entry = Entry {
            owner: owner.to_string(),
            messages,
            last_used: now,
        };
        let snapshot = entry.snapshot();

        if let Some((evicted, _)) = entries.push(conversation_id, entry) {
            tracing::debug!(conversation_id = %evicted, "Evicted conversation history");
        }
        snapshot
    }

    /// `false` when the conversation is not cached.
    pub async fn append(&self, conversation_id: Uuid, message: ChatMessage) -> bool {
        let mut entries = self.entries.lock().await;
        match self.live_entry(&mut entries, conversation_id, Instant::now()) {
            Some(entry) => {
                entry.messages.push_back(message);
                self.trim(&mut entry.messages);
                true
            }
            None => false,
        }
    }

    /// Append a user turn and its reply under one lock so exchanges on the
    /// same conversation stay paired. `false` when the conversation is not
    /// cached.
    pub async fn append_exchange(
        &self,
        conversation_id: Uuid,
        user_message: ChatMessage,
        agent_message: ChatMessage,
    ) -> bool {
        let mut entries = self.entries.lock().await;
        match self.live_entry(&mut entries, conversation_id, Instant::now()) {
            Some(entry) => {
                entry.messages.push_back(user_message);
                entry.messages.push_back(agent_message);
                self.trim(&mut entry.messages);
                true
            }
            None => false,
        }
    }

    pub async fn invalidate(&self, conversation_id: Uuid) {
        self.entries.lock().await.pop(&conversation_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
