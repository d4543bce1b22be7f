//! Per-conversation pacing.
//!
//! The gate is measured from the most recent of the previous admission and
//! the previous completion: `check` marks admissions, `record` overwrites the
//! mark when a message finishes.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    pub last_admission: Instant,
    pub admission_count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub tracked_conversations: usize,
    pub rate_limit_ms: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate_limit: Duration,
    entries: HashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new(rate_limit: Duration) -> Self {
        Self {
            rate_limit,
            entries: HashMap::new(),
        }
    }

    /// Returns how long the conversation must still wait; zero means admit.
    pub fn check(&mut self, conversation_id: &str) -> Duration {
        self.check_at(conversation_id, Instant::now())
    }

    pub fn check_at(&mut self, conversation_id: &str, now: Instant) -> Duration {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            self.entries.insert(
                conversation_id.to_string(),
                RateLimitEntry {
                    last_admission: now,
                    admission_count: 1,
                },
            );
            return Duration::ZERO;
        };

        let elapsed = now.saturating_duration_since(entry.last_admission);
        if elapsed < self.rate_limit {
            return self.rate_limit - elapsed;
        }

        entry.last_admission = now;
        entry.admission_count += 1;
        Duration::ZERO
    }

    /// Mark a completed message; the next admission is paced from here.
    pub fn record(&mut self, conversation_id: &str) {
        self.record_at(conversation_id, Instant::now());
    }

    pub fn record_at(&mut self, conversation_id: &str, now: Instant) {
        self.entries
            .entry(conversation_id.to_string())
            .and_modify(|entry| entry.last_admission = now)
            .or_insert(RateLimitEntry {
                last_admission: now,
                admission_count: 0,
            });
    }

    pub fn entry(&self, conversation_id: &str) -> Option<&RateLimitEntry> {
        self.entries.get(conversation_id)
    }

    pub fn clear(&mut self, conversation_id: &str) -> bool {
        self.entries.remove(conversation_id).is_some()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_conversations: self.entries.len(),
            rate_limit_ms: self.rate_limit.as_millis() as u64,
        }
    }
}
