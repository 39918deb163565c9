//! Per-client sliding-window rate limiter
//!
//! Each client keeps the timestamps of its requests within the current window.
//! Checking and recording happen under the client's shard lock, so two
//! concurrent requests from one client can never both take the last slot.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use telemetry_core::shard::ShardedMap;
use tracing::debug;

/// A client's budget at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: usize,
    pub remaining: usize,
    pub window_secs: u64,
    /// Seconds until the oldest request leaves the window
    pub reset_after_secs: u64,
}

/// Request refused; retry after the given delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub limit: usize,
    pub window_secs: u64,
    pub retry_after: Duration,
}

impl RateLimited {
    /// Retry delay rounded up to whole seconds, at least one
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clients: ShardedMap<String, VecDeque<Instant>>,
}

fn evict(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while requests
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        requests.pop_front();
    }
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            clients: ShardedMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request from `client` if it is within budget
    pub fn check(&self, client: &str) -> Result<RateLimitStatus, RateLimited> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<RateLimitStatus, RateLimited> {
        let (limit, window) = (self.limit, self.window);
        self.clients.with_shard(client, |clients| {
            let requests = clients.entry(client.to_string()).or_default();
            evict(requests, now, window);

            if requests.len() >= limit {
                let oldest = requests.front().copied().unwrap_or(now);
                let retry_after = window.saturating_sub(now.saturating_duration_since(oldest));
                debug!(client = %client, limit, "Rate limit exceeded");
                return Err(RateLimited {
                    limit,
                    window_secs: window.as_secs(),
                    retry_after,
                });
            }

            requests.push_back(now);
            Ok(self.status_of(requests, now))
        })
    }

    /// Current budget for `client` without recording a request
    pub fn status(&self, client: &str) -> RateLimitStatus {
        self.status_at(client, Instant::now())
    }

    pub fn status_at(&self, client: &str, now: Instant) -> RateLimitStatus {
        self.clients.with_shard(client, |clients| match clients.get_mut(client) {
            Some(requests) => {
                evict(requests, now, self.window);
                self.status_of(requests, now)
            }
            None => self.status_of(&VecDeque::new(), now),
        })
    }

    fn status_of(&self, requests: &VecDeque<Instant>, now: Instant) -> RateLimitStatus {
        let reset_after = requests
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or_default();
        RateLimitStatus {
            limit: self.limit,
            remaining: self.limit.saturating_sub(requests.len()),
            window_secs: self.window.as_secs(),
            reset_after_secs: reset_after.as_secs(),
        }
    }

    /// Drop clients with no requests in the current window
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&self, now: Instant) -> usize {
        let window = self.window;
        let mut removed = 0;
        self.clients.for_each_shard(|clients| {
            clients.retain(|_, requests| {
                evict(requests, now, window);
                let keep = !requests.is_empty();
                if !keep {
                    removed += 1;
                }
                keep
            });
        });
        removed
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
