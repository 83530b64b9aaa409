//! In-memory token bucket rate limiting keyed by client address.
//!
//! Buckets are created on first sight of a key and are never evicted, so the
//! store grows with the number of distinct clients seen by the process.

use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = capacity.min(self.tokens + elapsed * refill_rate);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Keyed bucket storage shared by every request handled by one service instance.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the bucket for `key` under the store lock, creating a
    /// full bucket first if the key is new.
    pub fn get_or_create<R>(
        &self,
        key: &str,
        capacity: f64,
        now: Instant,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> R {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(capacity, now));
        f(bucket)
    }

    pub fn snapshot(&self, key: &str) -> Option<TokenBucket> {
        self.buckets.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    store: BucketStore,
}

impl RateLimiter {
    /// `capacity` is the burst size, `refill_rate` is in tokens per second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::with_store(capacity, refill_rate, BucketStore::new())
    }

    pub fn per_minute(capacity: u32, requests_per_minute: u32) -> Self {
        Self::new(capacity, f64::from(requests_per_minute) / 60.0)
    }

    pub fn with_store(capacity: u32, refill_rate: f64, store: BucketStore) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_rate: refill_rate.max(0.0),
            store,
        }
    }

    /// Refills and tries to consume one token for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let (capacity, refill_rate) = (self.capacity, self.refill_rate);
        let allowed = self.store.get_or_create(key, capacity, now, |bucket| {
            bucket.refill(capacity, refill_rate, now);
            bucket.try_consume()
        });
        if !allowed {
            tracing::debug!(key, "rate limit bucket empty");
        }
        allowed
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    pub fn bucket(&self, key: &str) -> Option<TokenBucket> {
        self.store.snapshot(key)
    }

    /// Drops every bucket. Meant for test isolation.
    pub fn reset(&self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn burst_then_deny() {
        let limiter = RateLimiter::per_minute(3, 10);
        let now = Instant::now();
        let results: Vec<bool> = (0..5).map(|_| limiter.allow_at("1.2.3.4", now)).collect();
        assert_eq!(results, vec![true, true, true, false, false]);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::per_minute(1, 10);
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn refills_after_one_interval() {
        // 10/min => one token every 6 seconds
        let limiter = RateLimiter::per_minute(3, 10);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("k", start));
        }
        assert!(!limiter.allow_at("k", start + Duration::from_secs(3)));
        assert!(limiter.allow_at("k", start + Duration::from_secs(7)));
        assert!(!limiter.allow_at("k", start + Duration::from_secs(7)));
    }

    #[test]
    fn admits_exactly_at_refill_interval() {
        // 30/min => one token every 2 seconds
        let limiter = RateLimiter::per_minute(1, 30);
        let start = Instant::now();
        assert!(limiter.allow_at("a", start));
        assert!(!limiter.allow_at("a", start + Duration::from_secs(1)));
        assert!(limiter.allow_at("a", start + Duration::from_secs(2)));

        assert!(limiter.allow_at("b", start));
        assert!(!limiter.allow_at("b", start + Duration::from_millis(1999)));
    }

    #[test]
    fn default_rate_admits_at_six_seconds() {
        let limiter = RateLimiter::per_minute(3, 10);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("k", start));
        }
        assert!(limiter.allow_at("k", start + Duration::from_secs(6)));
        assert!(!limiter.allow_at("k", start + Duration::from_secs(6)));
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let limiter = RateLimiter::per_minute(2, 600);
        let start = Instant::now();
        assert!(limiter.allow_at("k", start));
        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at("k", later));
        let bucket = limiter.bucket("k").unwrap();
        assert!((bucket.tokens - 1.0).abs() < 1e-9);
    }

    #[test]
    fn denied_call_leaves_tokens_non_negative() {
        let limiter = RateLimiter::per_minute(1, 0);
        let now = Instant::now();
        assert!(limiter.allow_at("k", now));
        assert!(!limiter.allow_at("k", now));
        assert!(limiter.bucket("k").unwrap().tokens >= 0.0);
    }

    #[test]
    fn reset_restores_full_buckets() {
        let limiter = RateLimiter::per_minute(1, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("k", now));
        assert!(!limiter.allow_at("k", now));
        limiter.reset();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.allow_at("k", now));
    }

    #[test]
    fn concurrent_callers_never_overspend() {
        let limiter = Arc::new(RateLimiter::new(50, 0.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || (0..20).filter(|_| limiter.allow("shared")).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}
