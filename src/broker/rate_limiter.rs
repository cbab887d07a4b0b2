// =============================================================================
// Rate limiting — leaky-bucket quotas that suspend the caller
// =============================================================================
//
// The teacher's `RateLimitTracker` (binance/rate_limit.rs) is atomics-only
// and non-suspending: it answers "can I?" and leaves the caller to retry.
// The bridge's contract requires `acquire` to suspend until a token is
// available, never silently drop, so the actual gating here is `governor`'s
// leaky-bucket `RateLimiter::direct`. The teacher's counter style is kept
// as a read-only usage-reporting counterpart for observability.
// =============================================================================

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;
use tracing::debug;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn quota_per_second(rate: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rate.max(1)).unwrap())
}

/// Two independent leaky buckets: trading-ops (order placement/modification)
/// and history-ops (symbol info, historical bars). `acquire` suspends the
/// caller until a token is available.
pub struct BridgeRateLimiter {
    trading_ops: DirectRateLimiter,
    history_ops: DirectRateLimiter,
    trading_ops_sent: AtomicU32,
    history_ops_sent: AtomicU32,
}

impl BridgeRateLimiter {
    pub fn new(trading_ops_per_sec: u32, history_ops_per_sec: u32) -> Self {
        Self {
            trading_ops: RateLimiter::direct(quota_per_second(trading_ops_per_sec)),
            history_ops: RateLimiter::direct(quota_per_second(history_ops_per_sec)),
            trading_ops_sent: AtomicU32::new(0),
            history_ops_sent: AtomicU32::new(0),
        }
    }

    /// Default quotas: trading 50/s, history 5/s, per the bridge's rate
    /// limiting contract.
    pub fn with_default_quotas() -> Self {
        Self::new(50, 5)
    }

    pub async fn acquire_trading(&self) {
        self.trading_ops.until_ready().await;
        self.trading_ops_sent.fetch_add(1, Ordering::Relaxed);
        debug!(bucket = "trading", "rate limiter token acquired");
    }

    pub async fn acquire_history(&self) {
        self.history_ops.until_ready().await;
        self.history_ops_sent.fetch_add(1, Ordering::Relaxed);
        debug!(bucket = "history", "rate limiter token acquired");
    }

    pub fn trading_ops_sent(&self) -> u32 {
        self.trading_ops_sent.load(Ordering::Relaxed)
    }

    pub fn history_ops_sent(&self) -> u32 {
        self.history_ops_sent.load(Ordering::Relaxed)
    }
}
