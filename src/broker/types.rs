// =============================================================================
// Broker data model — account, positions, symbol metadata, order results
// =============================================================================

use serde::{Deserialize, Serialize};

/// Account snapshot as returned by `get_account`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
    pub equity: f64,
    pub used_margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
}

/// A real (broker-side) open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealPosition {
    pub symbol: String,
    pub ticket: u64,
    /// +1 long, -1 short.
    pub direction: i8,
    pub volume: f64,
    pub entry_price: f64,
}

/// Symbol metadata as returned by `get_symbol_info`, cached with a TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub digits: u32,
    pub pip_value_per_lot: Option<f64>,
    pub spread_points: f64,
    pub point: f64,
    pub contract_size: f64,
    pub margin_rate: f64,
}

/// Outcome of submitting an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub ticket: u64,
    pub fill_price: f64,
}

/// A single tick event from the broker's bar/tick subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickEvent {
    pub epoch_seconds: i64,
    pub bid: f64,
    pub ask: f64,
}

impl TickEvent {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread_points(&self, point: f64) -> f64 {
        if point <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / point
    }
}
