// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Token bucket rate limiting for writes.

use std::time::Duration;

use dashmap::DashMap;
use opcc_config::{RateLimitConfig, RateLimitKey};
use opcc_core::types::ServerId;
use tokio::time::Instant;

// =============================================================================
// Token Bucket
// =============================================================================

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens as f64,
            max_tokens: max_tokens as f64,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn time_until_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let needed = 1.0 - self.tokens;
            Duration::from_secs_f64(needed / self.refill_rate)
        }
    }

    fn is_full(&self) -> bool {
        self.tokens >= self.max_tokens
    }
}

// =============================================================================
// WriteRateLimiter
// =============================================================================

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// A token was taken.
    Allowed,
    /// The bucket is empty.
    Limited {
        /// Bucket key.
        key: String,
        /// Time until the next token.
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Returns `true` if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-key token buckets, created on first use.
#[derive(Debug)]
pub struct WriteRateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl WriteRateLimiter {
    /// Creates a limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if writes are limited at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Bucket key of a request.
    pub fn key_for(&self, user_id: &str, server_id: &ServerId) -> String {
        match self.config.key {
            RateLimitKey::User => format!("user:{}", user_id),
            RateLimitKey::Server => format!("server:{}", server_id),
            RateLimitKey::UserServer => format!("user:{}/server:{}", user_id, server_id),
        }
    }

    /// Takes a token from the request's bucket.
    pub fn check(&self, user_id: &str, server_id: &ServerId) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::Allowed;
        }

        let key = self.key_for(user_id, server_id);
        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::new(self.config.burst_size, self.config.requests_per_second));

        if bucket.try_acquire() {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Limited {
                retry_after: bucket.time_until_token(),
                key,
            }
        }
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drops buckets that have refilled completely.
    pub fn cleanup(&self) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.refill();
            !bucket.is_full()
        });
        before - self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(key: RateLimitKey, rps: f64, burst: u32) -> WriteRateLimiter {
        WriteRateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
            key,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited_then_refill() {
        let limiter = limiter(RateLimitKey::User, 2.0, 3);
        let plc = ServerId::new("plc");

        for _ in 0..3 {
            assert!(limiter.check("alice", &plc).is_allowed());
        }
        match limiter.check("alice", &plc) {
            RateLimitDecision::Limited { key, retry_after } => {
                assert_eq!(key, "user:alice");
                assert_eq!(retry_after, Duration::from_millis(500));
            }
            other => panic!("expected limit, got {:?}", other),
        }

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check("alice", &plc).is_allowed());
        assert!(!limiter.check("alice", &plc).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(RateLimitKey::UserServer, 1.0, 1);
        let a = ServerId::new("a");
        let b = ServerId::new("b");

        assert!(limiter.check("alice", &a).is_allowed());
        assert!(limiter.check("alice", &b).is_allowed());
        assert!(limiter.check("bob", &a).is_allowed());
        assert!(!limiter.check("alice", &a).is_allowed());
        assert_eq!(limiter.bucket_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_key_shares_bucket_across_users() {
        let limiter = limiter(RateLimitKey::Server, 1.0, 1);
        let plc = ServerId::new("plc");
        assert!(limiter.check("alice", &plc).is_allowed());
        assert!(!limiter.check("bob", &plc).is_allowed());
    }

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = WriteRateLimiter::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        let plc = ServerId::new("plc");
        for _ in 0..1000 {
            assert!(limiter.check("alice", &plc).is_allowed());
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_full_buckets() {
        let limiter = limiter(RateLimitKey::User, 10.0, 2);
        let plc = ServerId::new("plc");
        limiter.check("alice", &plc);
        limiter.check("bob", &plc);
        assert_eq!(limiter.cleanup(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.cleanup(), 2);
        assert_eq!(limiter.bucket_count(), 0);
    }
}
