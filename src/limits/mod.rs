//! Outbound rate limiting for collaborator calls.
//!
//! Ingestion and retrieval both call out to an [`LlmCollaborator`] or
//! [`EmbeddingCollaborator`](crate::collaborators::EmbeddingCollaborator)
//! per chunk/message; a single tenant running a large ingest must not be
//! able to starve every other tenant's requests. `RateLimiters` holds one
//! token bucket per tenant and one per user, refilled lazily on access
//! rather than by a background ticker (keeps the type `Send + Sync` with
//! no driving task to manage).

use crate::config::RateLimitConfig;
use crate::error::{EngineError, EngineResult};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Instant;

/// A lazily-refilled token bucket: `capacity` tokens, refilled at
/// `refill_per_sec` tokens/second, capped at `capacity`.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-tenant and per-user token buckets guarding outbound calls to
/// external collaborators.
pub struct RateLimiters {
    config: RateLimitConfig,
    per_tenant: DashMap<String, Mutex<TokenBucket>>,
    per_user: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiters {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            per_tenant: DashMap::new(),
            per_user: DashMap::new(),
        }
    }

    /// Consumes one token from `tenant_id`'s bucket, creating it on first
    /// use. Returns `Unavailable` when the bucket is empty.
    pub fn check_tenant(&self, tenant_id: &str) -> EngineResult<()> {
        let entry = self
            .per_tenant
            .entry(tenant_id.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.config.burst, self.config.per_tenant_rps)));
        let mut bucket = entry.lock().map_err(|_| EngineError::Internal("rate limiter mutex poisoned".into()))?;
        if bucket.try_take() {
            Ok(())
        } else {
            Err(EngineError::Unavailable(format!(
                "tenant {tenant_id} rate limit exceeded"
            )))
        }
    }

    /// Consumes one token from `user_id`'s bucket, creating it on first use.
    pub fn check_user(&self, user_id: &str) -> EngineResult<()> {
        let entry = self
            .per_user
            .entry(user_id.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.config.burst, self.config.per_user_rps)));
        let mut bucket = entry.lock().map_err(|_| EngineError::Internal("rate limiter mutex poisoned".into()))?;
        if bucket.try_take() {
            Ok(())
        } else {
            Err(EngineError::Unavailable(format!(
                "user {user_id} rate limit exceeded"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_capacity_is_consumed_then_exhausted() {
        let limiters = RateLimiters::new(RateLimitConfig {
            per_tenant_rps: 0.0,
            per_user_rps: 0.0,
            burst: 2,
        });
        assert!(limiters.check_tenant("t1").is_ok());
        assert!(limiters.check_tenant("t1").is_ok());
        let err = limiters.check_tenant("t1").unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[test]
    fn different_tenants_have_independent_buckets() {
        let limiters = RateLimiters::new(RateLimitConfig {
            per_tenant_rps: 0.0,
            per_user_rps: 0.0,
            burst: 1,
        });
        assert!(limiters.check_tenant("t1").is_ok());
        assert!(limiters.check_tenant("t2").is_ok());
    }

    #[test]
    fn bucket_refills_over_time() {
        let limiters = RateLimiters::new(RateLimitConfig {
            per_tenant_rps: 1000.0,
            per_user_rps: 1000.0,
            burst: 1,
        });
        assert!(limiters.check_user("u1").is_ok());
        assert!(limiters.check_user("u1").is_err());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(limiters.check_user("u1").is_ok());
    }
}
