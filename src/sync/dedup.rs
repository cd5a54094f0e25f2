//! Seen-message tracking with bounded retention
//!
//! Every id is stored with an expiry time. Expired entries are treated as unseen
//! immediately and are physically removed by `sweep`, which runs on every insert
//! and from the session's periodic sweep task.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::message::MessageId;

/// Default retention window for seen ids
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(20);

/// Tracks recently seen message ids
pub struct Deduplicator {
    /// Latest expiry per id
    seen: HashMap<MessageId, Instant>,
    /// Ids in insertion order, which is also expiry order
    expiry_queue: VecDeque<(MessageId, Instant)>,
    retention: Duration,
}

impl Deduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            expiry_queue: VecDeque::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.has_seen_at(id, Instant::now())
    }

    pub fn has_seen_at(&self, id: &MessageId, now: Instant) -> bool {
        self.seen.get(id).is_some_and(|expires| *expires > now)
    }

    pub fn mark_seen(&mut self, id: MessageId) {
        self.mark_seen_at(id, Instant::now());
    }

    /// Record `id` as seen, refreshing its expiry if it is already present
    pub fn mark_seen_at(&mut self, id: MessageId, now: Instant) {
        self.sweep_at(now);
        let expires = now + self.retention;
        self.seen.insert(id.clone(), expires);
        self.expiry_queue.push_back((id, expires));
    }

    /// Mark `id` as seen and report whether it was new
    pub fn check_and_mark(&mut self, id: &MessageId) -> bool {
        self.check_and_mark_at(id, Instant::now())
    }

    pub fn check_and_mark_at(&mut self, id: &MessageId, now: Instant) -> bool {
        if self.has_seen_at(id, now) {
            return false;
        }
        self.mark_seen_at(id.clone(), now);
        true
    }

    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove every entry whose expiry is at or before `now`
    ///
    /// Returns the number of ids removed.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((_, expires)) = self.expiry_queue.front() {
            if *expires > now {
                break;
            }
            let Some((id, expires)) = self.expiry_queue.pop_front() else {
                break;
            };
            // A re-mark leaves a stale queue entry behind; only the latest expiry counts
            if self.seen.get(&id) == Some(&expires) {
                self.seen.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Number of tracked ids, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
