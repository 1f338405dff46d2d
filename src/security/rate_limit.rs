use crate::error::{CrewError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tracing::warn;

const SHARDS: usize = 16;

/// Per-client request limits applied at `(client_id)` granularity.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_hour: u32,
    pub per_minute: u32,
    pub block: Duration,
}

#[derive(Debug, Default)]
struct Bucket {
    /// Request timestamps within the last hour, oldest first.
    requests: Vec<DateTime<Utc>>,
    block_until: Option<DateTime<Utc>>,
}

impl Bucket {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.requests.retain(|ts| *ts > cutoff);
    }

    fn recent_minute(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(1);
        self.requests.iter().filter(|ts| **ts > cutoff).count()
    }

    fn idle(&self, now: DateTime<Utc>) -> bool {
        self.requests.is_empty() && self.block_until.is_none_or(|until| until <= now)
    }
}

/// Sliding-window rate limiter, sharded to keep contention per-client.
///
/// Counters are advisory: accuracy within one request is sufficient, so
/// the windows are pruned lazily on each admit call.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, client_id: &str) -> &Mutex<HashMap<String, Bucket>> {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Admits or rejects one request for `client_id`.
    ///
    /// # Errors
    /// Returns `CrewError::RateLimited` carrying the remaining block time
    /// when either window is exhausted.
    pub fn admit(&self, client_id: &str, limits: RateLimits) -> Result<()> {
        self.admit_at(client_id, limits, Utc::now())
    }

    pub(crate) fn admit_at(
        &self,
        client_id: &str,
        limits: RateLimits,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut shard = match self.shard(client_id).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Lazy eviction of idle buckets sharing this shard.
        shard.retain(|_, bucket| !bucket.idle(now));
        let bucket = shard.entry(client_id.to_string()).or_default();

        if let Some(until) = bucket.block_until {
            if until > now {
                return Err(CrewError::RateLimited {
                    retry_after_secs: (until - now).num_seconds().max(1),
                });
            }
            bucket.block_until = None;
        }

        bucket.prune(now);
        if bucket.requests.len() >= limits.per_hour as usize {
            let until = now + limits.block;
            bucket.block_until = Some(until);
            warn!(client = client_id, "hourly rate limit exceeded, blocking");
            return Err(CrewError::RateLimited {
                retry_after_secs: limits.block.num_seconds().max(1),
            });
        }
        if bucket.recent_minute(now) >= limits.per_minute as usize {
            warn!(client = client_id, "burst limit exceeded");
            return Err(CrewError::RateLimited {
                retry_after_secs: 60,
            });
        }

        bucket.requests.push(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{RateLimiter, RateLimits};
    use crate::error::CrewError;
    use chrono::{Duration, Utc};

    fn limits() -> RateLimits {
        RateLimits {
            per_hour: 100,
            per_minute: 10,
            block: Duration::hours(1),
        }
    }

    #[test]
    fn eleventh_request_in_a_minute_is_limited() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for i in 0..10 {
            let ts = now + Duration::milliseconds(i);
            assert!(limiter.admit_at("client", limits(), ts).is_ok());
        }
        let result = limiter.admit_at("client", limits(), now + Duration::milliseconds(11));
        assert!(matches!(result, Err(CrewError::RateLimited { .. })));
    }

    #[test]
    fn hundred_first_request_in_an_hour_blocks() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for i in 0..100_i64 {
            // Spread over the hour to stay under the burst window.
            let ts = now + Duration::seconds(i * 30);
            assert!(limiter.admit_at("client", limits(), ts).is_ok());
        }
        let at = now + Duration::seconds(100 * 30);
        let result = limiter.admit_at("client", limits(), at);
        assert!(matches!(result, Err(CrewError::RateLimited { .. })));

        // Still blocked before the window elapses even though the hourly
        // window has rolled.
        let blocked = limiter.admit_at("client", limits(), at + Duration::minutes(30));
        assert!(matches!(blocked, Err(CrewError::RateLimited { .. })));

        // Admitted again after the block expires.
        let after = limiter.admit_at("client", limits(), at + Duration::minutes(61));
        assert!(after.is_ok());
    }

    #[test]
    fn clients_do_not_interfere() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for i in 0..10 {
            let ts = now + Duration::milliseconds(i);
            assert!(limiter.admit_at("a", limits(), ts).is_ok());
        }
        assert!(limiter
            .admit_at("b", limits(), now + Duration::milliseconds(11))
            .is_ok());
    }
}
