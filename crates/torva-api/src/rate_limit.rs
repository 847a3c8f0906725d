//! Fixed-window request limiter keyed by caller identity.
//!
//! Authenticated requests key on the user id, anonymous ones on the remote
//! address. Buckets are swept by a background task every two windows so the
//! map stays bounded by the active caller set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::SharedState;

struct Bucket {
    tokens: u32,
    window_start: Instant,
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// How long until the window resets, for `Retry-After`.
    pub retry_after: Duration,
}

/// Fixed-window token bucket per identity.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Limiter admitting `limit` requests per `window` per key.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// The configured per-window limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Check-and-consume one request for `key`.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.limit,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.tokens = self.limit;
            bucket.window_start = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Decision {
                allowed: true,
                remaining: bucket.tokens,
                retry_after: Duration::ZERO,
            }
        } else {
            Decision {
                allowed: false,
                remaining: 0,
                retry_after: self.window.saturating_sub(now.duration_since(bucket.window_start)),
            }
        }
    }

    /// Drop buckets idle for more than two windows.
    pub fn cleanup(&self) {
        let horizon = self.window * 2;
        let now = Instant::now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) <= horizon);
    }

    /// Spawn the periodic bucket sweeper (every two windows).
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = limiter.window * 2;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                limiter.cleanup();
            }
        })
    }
}

/// Rate-limit middleware for `/api/v1`; keyed by the authenticated user when
/// the auth middleware already ran, otherwise by remote address.
///
/// # Errors
///
/// Returns 429 with `Retry-After` when the window is exhausted.
pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<Identity>()
        .map_or_else(|| addr.ip().to_string(), |identity| identity.user_id.to_string());

    let decision = state.limiter.check(&key);
    if !decision.allowed {
        return Err(ApiError::rate_limited(decision.retry_after.as_secs().max(1)));
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&state.limiter.limit().to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_exactly_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for expected_remaining in (0..3).rev() {
            let decision = limiter.check_at("alice", now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let denied = limiter.check_at("alice", now);
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn window_reset_refills_tokens() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("bob", now).allowed);
        assert!(!limiter.check_at("bob", now).allowed);
        assert!(limiter.check_at("bob", now + Duration::from_secs(61)).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn cleanup_prunes_stale_buckets_only() {
        let limiter = RateLimiter::new(1, Duration::from_millis(1));
        limiter.check("stale");
        std::thread::sleep(Duration::from_millis(5));
        limiter.check("fresh");
        limiter.cleanup();
        let buckets = limiter.buckets.lock().expect("lock");
        assert!(!buckets.contains_key("stale"));
        assert!(buckets.contains_key("fresh"));
    }
}
