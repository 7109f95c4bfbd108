use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use tracing::info;

use parley_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Fixed-window rate limiter keyed by (principal-or-IP, time bucket).
///
/// Buckets live in a map bounded by the background eviction task, which
/// drops every bucket older than the previous window.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(String, i64), u32>>>,
    max_per_window: u32,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_secs: i64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_per_window,
            window_secs,
        }
    }

    /// Count one request against the key's current window. Returns false
    /// once the window is exhausted.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> bool {
        let bucket = now.timestamp().div_euclid(self.window_secs);

        // Fail open on a poisoned lock rather than rejecting all traffic.
        let Ok(mut buckets) = self.buckets.lock() else {
            return true;
        };

        let count = buckets.entry((key.to_string(), bucket)).or_insert(0);
        if *count >= self.max_per_window {
            return false;
        }
        *count += 1;
        true
    }

    /// Drop buckets older than the previous window. Returns how many were
    /// removed.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let current = now.timestamp().div_euclid(self.window_secs);

        let Ok(mut buckets) = self.buckets.lock() else {
            return 0;
        };

        let before = buckets.len();
        buckets.retain(|(_, bucket), _| *bucket >= current - 1);
        before - buckets.len()
    }

    /// Background task that keeps the bucket map bounded.
    pub async fn run_eviction_loop(self, interval_secs: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            let removed = self.evict(Utc::now());
            if removed > 0 {
                info!("Rate limiter: evicted {} stale buckets", removed);
            }
        }
    }
}

/// Throttle middleware. Keyed by the authenticated principal when claims
/// are present (protected routes run this inside `require_auth`), otherwise
/// by the client IP.
pub async fn throttle(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = if let Some(claims) = req.extensions().get::<Claims>() {
        claims.sub.to_string()
    } else if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "anonymous".to_string()
    };

    if !state.limiter.check(&key, Utc::now()) {
        return Err(ApiError::Throttled);
    }

    Ok(next.run(req).await)
}
