// src/ratelimit.rs
//! In-memory token bucket limiter keyed by client identifier.
//!
//! Buckets refill in whole chunks: every full interval since the last refill
//! adds `tokens_per_interval` tokens, capped at `tokens_per_interval`. The
//! map lives in one process and is never evicted.

use crate::error::AppError;
use chrono::Utc;
use log::{debug, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use warp::{Filter, Rejection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub tokens_per_interval: u32,
    pub interval: Duration,
}

/// What the request looked like from the limiter's point of view.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub remote: Option<SocketAddr>,
}

pub type Identifier = Arc<dyn Fn(&ClientInfo) -> String + Send + Sync>;

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_ip(client: &ClientInfo) -> String {
    client
        .forwarded_for
        .as_deref()
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| client.real_ip.as_deref().map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .or_else(|| client.remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the next refill.
    pub reset_after: Duration,
}

impl RateLimitOutcome {
    pub fn reset_epoch_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.reset_after.as_millis() as i64
    }

    pub fn retry_after_secs(&self) -> u64 {
        let millis = self.reset_after.as_millis() as u64;
        (millis + 999) / 1000
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    identifier: Identifier,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_identifier(config, Arc::new(client_ip))
    }

    pub fn with_identifier(config: RateLimitConfig, identifier: Identifier) -> Self {
        Self {
            config,
            identifier,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn limit(&self, key: &str) -> RateLimitOutcome {
        self.limit_at(key, Instant::now())
    }

    pub fn limit_at(&self, key: &str, now: Instant) -> RateLimitOutcome {
        let capacity = self.config.tokens_per_interval;
        let interval = self.config.interval.as_nanos().max(1);

        let mut buckets = self.lock_buckets();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_nanos();
        let chunks = elapsed / interval;
        if chunks > 0 {
            let added = chunks.saturating_mul(u128::from(capacity));
            let refilled = u128::from(bucket.tokens).saturating_add(added);
            bucket.tokens = refilled.min(u128::from(capacity)) as u32;
            bucket.last_refill = now;
        }

        let since_refill = now.saturating_duration_since(bucket.last_refill).as_nanos();
        let reset_nanos = interval - since_refill % interval;
        let reset_after = Duration::from_nanos(reset_nanos.min(u128::from(u64::MAX)) as u64);

        let success = bucket.tokens > 0;
        if success {
            bucket.tokens -= 1;
        }

        RateLimitOutcome {
            success,
            limit: capacity,
            remaining: bucket.tokens,
            reset_after,
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock_buckets().len()
    }

    fn admit(&self, client: &ClientInfo) -> Result<(), AppError> {
        let key = (self.identifier)(client);
        let outcome = self.limit(&key);
        if outcome.success {
            return Ok(());
        }
        debug!("Rate limit exceeded for {}", key);
        Err(AppError::RateLimited {
            limit: outcome.limit,
            remaining: outcome.remaining,
            reset_ms: outcome.reset_epoch_ms(),
            retry_after_secs: outcome.retry_after_secs(),
        })
    }
}

/// Rejects with 429 once the caller's bucket is empty. Passes everything
/// through when no limiter is configured.
pub fn rate_limit(
    limiter: Option<Arc<RateLimiter>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::header::optional::<String>("x-real-ip"))
        .and(warp::addr::remote())
        .and_then(
            move |forwarded_for: Option<String>, real_ip: Option<String>, remote: Option<SocketAddr>| {
                let limiter = limiter.clone();
                async move {
                    if let Some(limiter) = limiter {
                        let client = ClientInfo {
                            forwarded_for,
                            real_ip,
                            remote,
                        };
                        limiter.admit(&client).map_err(warp::reject::custom)?;
                    }
                    Ok::<(), Rejection>(())
                }
            },
        )
        .untuple_one()
}
