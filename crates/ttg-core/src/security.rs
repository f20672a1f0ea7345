use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

use crate::domain::TelegramId;

// ============== Owner Check ==============

pub fn is_owner(user: Option<TelegramId>, owner: TelegramId) -> bool {
    user == Some(owner)
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket per key (client address, user id, ...).
#[derive(Clone, Debug)]
pub struct RateLimiter<K> {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<K, Bucket>,
}

impl<K: Hash + Eq + Copy> RateLimiter<K> {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: K) -> (bool, Option<Duration>) {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&mut self, key: K, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }

        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (true, None);
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }

    /// Forget buckets that have been idle long enough to be full again.
    pub fn prune_at(&mut self, now: Instant) {
        let full_after = Duration::from_secs_f64(self.max_tokens / self.refill_per_sec.max(1e-9));
        self.buckets
            .retain(|_, b| now.duration_since(b.last_update) < full_after);
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
