// =============================================================================
// Risk Guard — ordered pre-trade gates protecting capital
// =============================================================================
//
// Gates run in order and the first failure short-circuits the rest:
// drawdown, margin, spread, circuit breaker. Redesigned from the teacher's
// `RiskEngine`, which runs four independently-tripped breakers (daily loss,
// consecutive losses, max drawdown, trade limit) with no fixed evaluation
// order; here the order itself is the contract the executor relies on.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::RiskError;

/// The inputs a single pre-trade check needs, gathered by the executor
/// immediately before evaluating the gates.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext {
    pub equity: f64,
    pub free_margin: f64,
    pub required_margin: f64,
    /// `None` when the spread-refresh loop has not yet published a value
    /// for this symbol.
    pub spread_pips: Option<f64>,
    pub max_spread_pips: f64,
}

#[derive(Debug)]
struct Inner {
    initial_balance: f64,
    dd_limit_pct: f64,
    dd_emergency_pct: f64,
    max_consecutive_losses: u32,
    consecutive_losses: u32,
    circuit_tripped_at: Option<DateTime<Utc>>,
    cooldown_minutes: i64,
    /// Development-only escape hatch; production default is fail-closed.
    fail_open_on_unknown_spread: bool,
}

/// Pre-trade risk gates. Shared across symbols (one Risk Guard per process),
/// guarded by a reader-writer lock since reads (gate evaluation) vastly
/// outnumber writes (`record_result`).
pub struct RiskGuard {
    inner: RwLock<Inner>,
}

impl RiskGuard {
    pub fn new(initial_balance: f64, dd_limit_pct: f64, dd_emergency_pct: f64, max_consecutive_losses: u32) -> Self {
        Self {
            inner: RwLock::new(Inner {
                initial_balance,
                dd_limit_pct,
                dd_emergency_pct,
                max_consecutive_losses,
                consecutive_losses: 0,
                circuit_tripped_at: None,
                cooldown_minutes: 60,
                fail_open_on_unknown_spread: false,
            }),
        }
    }

    /// Opt into fail-open spread handling; must be a deliberate choice, not
    /// a default (production default is fail-closed, per the pre-trade gate
    /// contract).
    pub fn set_fail_open_on_unknown_spread(&self, fail_open: bool) {
        self.inner.write().fail_open_on_unknown_spread = fail_open;
    }

    /// Run all four gates in order against `ctx`; the first failure is
    /// returned.
    pub fn check(&self, ctx: RiskContext, now: DateTime<Utc>) -> Result<(), RiskError> {
        let inner = self.inner.read();

        // 1. Drawdown.
        let dd_pct = (inner.initial_balance - ctx.equity) / inner.initial_balance * 100.0;
        if dd_pct >= inner.dd_emergency_pct {
            return Err(RiskError::Emergency {
                dd_pct,
                limit_pct: inner.dd_emergency_pct,
            });
        }
        if dd_pct >= inner.dd_limit_pct {
            return Err(RiskError::DrawdownLimit {
                dd_pct,
                limit_pct: inner.dd_limit_pct,
            });
        }

        // 2. Margin.
        if ctx.free_margin < ctx.required_margin {
            return Err(RiskError::InsufficientMargin {
                free: ctx.free_margin,
                required: ctx.required_margin,
            });
        }

        // 3. Spread.
        match ctx.spread_pips {
            Some(spread) if spread > ctx.max_spread_pips => {
                return Err(RiskError::SpreadExceeded {
                    spread_pips: spread,
                    max_pips: ctx.max_spread_pips,
                });
            }
            Some(_) => {}
            None if inner.fail_open_on_unknown_spread => {}
            None => return Err(RiskError::SpreadUnknown),
        }

        // 4. Circuit breaker.
        if inner.consecutive_losses >= inner.max_consecutive_losses {
            let cooled_down = inner
                .circuit_tripped_at
                .map(|tripped_at| now.signed_duration_since(tripped_at).num_minutes() >= inner.cooldown_minutes)
                .unwrap_or(false);
            if !cooled_down {
                return Err(RiskError::CircuitBreakerOpen {
                    consecutive_losses: inner.consecutive_losses,
                });
            }
        }

        Ok(())
    }

    /// Update the consecutive-loss counter after a trade closes: increments
    /// on a loss, resets to 0 on a non-negative result.
    pub fn record_result(&self, pnl: f64, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        if pnl < 0.0 {
            inner.consecutive_losses += 1;
            if inner.consecutive_losses >= inner.max_consecutive_losses && inner.circuit_tripped_at.is_none() {
                inner.circuit_tripped_at = Some(now);
            }
        } else {
            inner.consecutive_losses = 0;
            inner.circuit_tripped_at = None;
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.inner.read().consecutive_losses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn guard() -> RiskGuard {
        RiskGuard::new(10_000.0, 5.0, 10.0, 3)
    }

    fn healthy_ctx() -> RiskContext {
        RiskContext {
            equity: 10_000.0,
            free_margin: 5_000.0,
            required_margin: 100.0,
            spread_pips: Some(1.0),
            max_spread_pips: 3.0,
        }
    }

    #[test]
    fn healthy_context_passes_all_gates() {
        let g = guard();
        assert!(g.check(healthy_ctx(), Utc::now()).is_ok());
    }

    #[test]
    fn drawdown_limit_short_circuits() {
        let g = guard();
        let mut ctx = healthy_ctx();
        ctx.equity = 9_400.0; // 6% dd, >= 5% limit, < 10% emergency
        assert_eq!(
            g.check(ctx, Utc::now()).unwrap_err(),
            RiskError::DrawdownLimit { dd_pct: 6.0, limit_pct: 5.0 }
        );
    }

    #[test]
    fn emergency_drawdown_takes_priority_over_limit() {
        let g = guard();
        let mut ctx = healthy_ctx();
        ctx.equity = 8_900.0; // 11% dd, >= 10% emergency
        let err = g.check(ctx, Utc::now()).unwrap_err();
        assert!(matches!(err, RiskError::Emergency { .. }));
    }

    #[test]
    fn insufficient_margin_fails_after_drawdown_passes() {
        let g = guard();
        let mut ctx = healthy_ctx();
        ctx.required_margin = 10_000.0;
        assert_eq!(
            g.check(ctx, Utc::now()).unwrap_err(),
            RiskError::InsufficientMargin { free: 5_000.0, required: 10_000.0 }
        );
    }

    #[test]
    fn spread_exceeded_fails_gate_three() {
        let g = guard();
        let mut ctx = healthy_ctx();
        ctx.spread_pips = Some(5.0);
        assert_eq!(
            g.check(ctx, Utc::now()).unwrap_err(),
            RiskError::SpreadExceeded { spread_pips: 5.0, max_pips: 3.0 }
        );
    }

    #[test]
    fn unknown_spread_fails_closed_by_default() {
        let g = guard();
        let mut ctx = healthy_ctx();
        ctx.spread_pips = None;
        assert_eq!(g.check(ctx, Utc::now()).unwrap_err(), RiskError::SpreadUnknown);
    }

    #[test]
    fn unknown_spread_passes_when_fail_open_configured() {
        let g = guard();
        g.set_fail_open_on_unknown_spread(true);
        let mut ctx = healthy_ctx();
        ctx.spread_pips = None;
        assert!(g.check(ctx, Utc::now()).is_ok());
    }

    #[test]
    fn circuit_breaker_trips_after_max_consecutive_losses() {
        let g = guard();
        let now = Utc::now();
        g.record_result(-10.0, now);
        g.record_result(-10.0, now);
        g.record_result(-10.0, now);
        assert_eq!(g.consecutive_losses(), 3);
        assert_eq!(
            g.check(healthy_ctx(), now).unwrap_err(),
            RiskError::CircuitBreakerOpen { consecutive_losses: 3 }
        );
    }

    #[test]
    fn circuit_breaker_resets_on_winning_trade() {
        let g = guard();
        let now = Utc::now();
        g.record_result(-10.0, now);
        g.record_result(-10.0, now);
        g.record_result(10.0, now);
        assert_eq!(g.consecutive_losses(), 0);
        assert!(g.check(healthy_ctx(), now).is_ok());
    }

    #[test]
    fn circuit_breaker_rearms_after_cooldown() {
        let g = guard();
        let tripped_at = Utc::now();
        g.record_result(-10.0, tripped_at);
        g.record_result(-10.0, tripped_at);
        g.record_result(-10.0, tripped_at);
        let later = tripped_at + Duration::minutes(61);
        assert!(g.check(healthy_ctx(), later).is_ok());
    }

    #[test]
    fn circuit_breaker_still_open_before_cooldown_elapses() {
        let g = guard();
        let tripped_at = Utc::now();
        g.record_result(-10.0, tripped_at);
        g.record_result(-10.0, tripped_at);
        g.record_result(-10.0, tripped_at);
        let soon = tripped_at + Duration::minutes(5);
        assert!(g.check(healthy_ctx(), soon).is_err());
    }
}
