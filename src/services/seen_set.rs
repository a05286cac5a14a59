//! Seen-set: which listings this run has already evaluated
//!
//! Entries expire after a TTL so a listing whose bid count or budget changed is
//! looked at again. Size is capped; on overflow the oldest share of entries is
//! dropped in one batch. Owned by the poll loop only, never persisted.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Seen-set limits
#[derive(Debug, Clone)]
pub struct SeenSetConfig {
    pub ttl: Duration,
    pub capacity: usize,
    /// Share of `capacity` evicted when it is exceeded
    pub evict_fraction: f64,
}

impl Default for SeenSetConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(3600),
            capacity: 500,
            evict_fraction: 0.2,
        }
    }
}

#[derive(Debug)]
pub struct SeenSet {
    config: SeenSetConfig,
    entries: HashMap<i64, DateTime<Utc>>,
}

impl SeenSet {
    pub fn new(config: SeenSetConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mark_seen(&mut self, id: i64, now: DateTime<Utc>) {
        self.entries.insert(id, now);
    }

    /// True while the entry is younger than the TTL
    pub fn is_seen(&self, id: i64, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&id)
            .map(|seen_at| now - *seen_at <= self.config.ttl)
            .unwrap_or(false)
    }

    /// Drop entries older than the TTL; returns how many were removed
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, seen_at| now - *seen_at <= ttl);
        before - self.entries.len()
    }

    /// Remove the oldest `floor(capacity * fraction)` entries (at least one).
    /// Ties on timestamp go by id.
    pub fn evict_oldest_fraction(&mut self, fraction: f64) -> usize {
        let count = ((self.config.capacity as f64 * fraction).floor() as usize)
            .max(1)
            .min(self.entries.len());

        let mut by_age: Vec<(DateTime<Utc>, i64)> =
            self.entries.iter().map(|(id, at)| (*at, *id)).collect();
        by_age.sort_unstable();

        for (_, id) in by_age.into_iter().take(count) {
            self.entries.remove(&id);
        }
        count
    }

    /// Evict the oldest batch if over capacity; returns how many were removed
    pub fn trim_to_capacity(&mut self) -> usize {
        if self.entries.len() <= self.config.capacity {
            return 0;
        }
        let mut removed = 0;
        while self.entries.len() > self.config.capacity {
            removed += self.evict_oldest_fraction(self.config.evict_fraction);
        }
        removed
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(SeenSetConfig::default())
    }
}
