// =============================================================================
// Paper Trader — shadow-runs signals against training-time cost parameters
// =============================================================================
//
// Consumes the same Signal the Executor receives, at the same point in the
// pipeline, so drift between "model as trained" and "model as executed" can
// be measured after the fact. Owns a separate VirtualPosition per symbol,
// seeded from the bundle's own cost parameters rather than the live broker's,
// so paper PnL never contaminates (or is contaminated by) real spread/
// slippage/commission observed from the live connector.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Signal;
use crate::virtual_position::{CostParams, VirtualPosition};

/// One simulated fill, persisted alongside real trades and distinguished by
/// `is_paper`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub symbol: String,
    pub realized_pnl: f64,
    pub floating_pnl: f64,
    pub direction: i8,
    pub intensity: u8,
    pub emitted_at: i64,
    pub is_paper: bool,
}

/// One simulated account per symbol; the trader itself holds no aggregate
/// balance because the spec's scope is per-symbol drift measurement, not a
/// full simulated ledger.
pub struct PaperTrader {
    positions: HashMap<String, VirtualPosition>,
}

impl PaperTrader {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
        }
    }

    /// Register (or replace) the training-time cost parameters for a symbol.
    /// Must be called once per symbol, typically right after the matching
    /// model bundle loads, before any signal for that symbol is recorded.
    pub fn register_symbol(&mut self, symbol: impl Into<String>, costs: CostParams) {
        self.positions.insert(symbol.into(), VirtualPosition::new(costs));
    }

    /// Apply one signal to the symbol's simulated position. Returns `None`
    /// if the symbol was never registered (model bundle not yet loaded).
    pub fn record(&mut self, signal: &Signal) -> Option<PaperTrade> {
        let position = self.positions.get_mut(&signal.symbol)?;
        let realized_pnl = position.update(signal.action, signal.close_price);
        Some(PaperTrade {
            symbol: signal.symbol.clone(),
            realized_pnl,
            floating_pnl: position.floating_pnl(),
            direction: signal.direction,
            intensity: signal.intensity,
            emitted_at: signal.emitted_at,
            is_paper: true,
        })
    }
}

impl Default for PaperTrader {
    fn default() -> Self {
        Self::new()
    }
}
