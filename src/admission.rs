//! Admission primitives: API-key verification and per-source rate limiting.
//!
//! The rate limiter keeps one bucket per `(source address, endpoint)` pair.
//! A bucket is a ring of admission timestamps over a rolling 60-second
//! window, so the configured count is an exact bound for any window — a
//! continuously refilling bucket would admit up to twice the count across a
//! window straddling its refill. State is sharded by address hash; each
//! shard has its own mutex, no global lock.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitsConfig;

/// Request bodies above this bound are rejected before deserialization.
pub const MAX_BODY_BYTES: usize = 128 * 1024;

/// Rolling window over which per-endpoint limits apply.
const WINDOW: Duration = Duration::from_secs(60);

/// Number of independently locked shards.
const SHARDS: usize = 16;

/// Rate-limited endpoint classes. Everything else is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Insert,
    Search,
    Chat,
    Refresh,
}

impl Endpoint {
    /// Classify a request path. `None` means the path is neither rate
    /// limited nor API-key protected.
    pub fn classify(path: &str) -> Option<Self> {
        match path {
            "/insert" => Some(Endpoint::Insert),
            "/search" => Some(Endpoint::Search),
            "/chat" => Some(Endpoint::Chat),
            "/monad/refresh" => Some(Endpoint::Refresh),
            _ => None,
        }
    }
}

impl RateLimitsConfig {
    fn limit_for(&self, endpoint: Endpoint) -> u32 {
        match endpoint {
            Endpoint::Insert => self.insert_per_minute,
            Endpoint::Search => self.search_per_minute,
            Endpoint::Chat => self.chat_per_minute,
            Endpoint::Refresh => self.refresh_per_minute,
        }
    }
}

type Buckets = HashMap<(IpAddr, Endpoint), VecDeque<Instant>>;

pub struct RateLimiter {
    shards: Vec<Mutex<Buckets>>,
    limits: RateLimitsConfig,
}

impl RateLimiter {
    pub fn new(limits: RateLimitsConfig) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(Buckets::new())).collect(),
            limits,
        }
    }

    /// Admit or reject one request from `source` against `endpoint`'s bucket.
    pub fn check(&self, source: IpAddr, endpoint: Endpoint) -> bool {
        self.check_at(source, endpoint, Instant::now())
    }

    /// Deterministic variant used by tests.
    pub fn check_at(&self, source: IpAddr, endpoint: Endpoint, now: Instant) -> bool {
        let limit = self.limits.limit_for(endpoint) as usize;
        let shard = &self.shards[shard_index(&source)];
        let mut buckets = shard.lock().expect("rate limiter shard poisoned");
        let window = buckets.entry((source, endpoint)).or_default();

        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= limit {
            false
        } else {
            window.push_back(now);
            true
        }
    }
}

fn shard_index(source: &IpAddr) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    (hasher.finish() as usize) % SHARDS
}

/// Compares a provided key against the configured one. An unset configured
/// key means open admission.
pub fn api_key_ok(configured: Option<&str>, provided: Option<&str>) -> bool {
    match configured {
        None => true,
        Some(expected) => provided == Some(expected),
    }
}
