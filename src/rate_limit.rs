//! Fixed-window per-client rate limiting.
//!
//! Each client key (the client IP) gets one counter per discrete,
//! non-overlapping time window. The counter and its expiry live in a
//! concurrent map; the per-key entry lock makes increment-then-compare
//! atomic for a key, so two requests racing on the same key can never
//! both observe a stale count. Across different keys no ordering is
//! guaranteed or needed.
//!
//! Expired windows are replaced lazily the next time their key is
//! checked. There is no background sweep: a key that never returns
//! leaves its last slot in the map, so the map can grow without bound
//! under high key cardinality. That capacity risk is accepted and
//! surfaced via [`FixedWindowLimiter::tracked_keys`] rather than hidden.
//!
//! Fixed windows admit up to twice the nominal rate across a window
//! boundary (a full budget at the end of one window plus a full budget
//! at the start of the next). This is the documented cost of O(1) state
//! per key; it is pinned by tests, not smoothed away.
//!
//! Counters are never decremented. A request that increments its
//! counter and is later cancelled still consumed budget; that drift is
//! acceptable, retroactive adjustment is not.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::{GatewayError, Result};

/// One live counting window for one client key.
#[derive(Debug, Clone, Copy)]
struct WindowSlot {
    count: u32,
    expires_at: Instant,
}

/// The outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheck {
    /// Whether the request is within the window's budget.
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Time until the current window expires.
    pub reset_after: Duration,
}

impl RateCheck {
    /// `reset_after` rounded up to whole seconds, for `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// A thread-safe fixed-window request counter keyed by client IP.
///
/// Constructed once at startup and shared across all request handlers;
/// cloning shares the underlying map. Accounting is process-local: each
/// gateway instance enforces its own independent limit, so horizontal
/// scaling multiplies the effective system-wide limit by the instance
/// count.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    slots: Arc<DashMap<String, WindowSlot>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    /// Creates a limiter admitting `max_requests` per `window` per key.
    /// Both must be non-zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(GatewayError::Config(
                "rate limit max_requests must be non-zero".into(),
            ));
        }
        if window.is_zero() {
            return Err(GatewayError::Config(
                "rate limit window must be non-zero".into(),
            ));
        }
        Ok(Self {
            slots: Arc::new(DashMap::new()),
            max_requests,
            window,
        })
    }

    /// Creates a limiter from the validated configuration section.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Counts one request for `key` and reports whether it fits the
    /// current window.
    ///
    /// A missing or expired slot is replaced with a fresh one before
    /// counting, so the first request of a window always sees a full
    /// budget. Denied requests still increment the counter; the count
    /// may therefore exceed the limit within a window, which keeps the
    /// check O(1) and makes repeated denials cheap.
    pub fn check(&self, key: &str) -> RateCheck {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_owned()).or_insert(WindowSlot {
            count: 0,
            expires_at: now + self.window,
        });

        if slot.expires_at <= now {
            *slot = WindowSlot {
                count: 0,
                expires_at: now + self.window,
            };
        }

        slot.count = slot.count.saturating_add(1);

        RateCheck {
            allowed: slot.count <= self.max_requests,
            remaining: self.max_requests.saturating_sub(slot.count),
            reset_after: slot.expires_at.saturating_duration_since(now),
        }
    }

    /// Number of keys currently holding a slot, live or expired. Grows
    /// with observed key cardinality until those keys are checked again.
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    /// The configured per-window budget.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// The configured window duration.
    pub fn window(&self) -> Duration {
        self.window
    }
}
