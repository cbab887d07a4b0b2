// =============================================================================
// Symbol configuration — per-symbol trading parameters, owned by the Executor
// =============================================================================
//
// A single JSON document mapping symbol -> {enabled, lot_mapping, sl_usd,
// tp_usd, max_spread_pips}, plus a reserved top-level `_risk` entry carrying
// risk parameters. Hot-reload is not required; a new document only takes
// effect on the next process start.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

fn default_lot_mapping() -> HashMap<u8, f64> {
    let mut m = HashMap::new();
    m.insert(1, 0.01);
    m.insert(2, 0.02);
    m.insert(3, 0.05);
    m
}

/// Per-symbol trading parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Intensity (1..3) -> lot size.
    #[serde(default = "default_lot_mapping")]
    pub lot_mapping: HashMap<u8, f64>,
    /// Stop-loss distance in USD. 0 disables the stop.
    #[serde(default)]
    pub sl_usd: f64,
    /// Take-profit distance in USD. 0 disables the target.
    #[serde(default)]
    pub tp_usd: f64,
    #[serde(default)]
    pub max_spread_pips: f64,
}

impl Default for SymbolEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            lot_mapping: default_lot_mapping(),
            sl_usd: 0.0,
            tp_usd: 0.0,
            max_spread_pips: 3.0,
        }
    }
}

impl SymbolEntry {
    /// Lot size for a signal of the given intensity (1..3). Intensity 0
    /// (Wait) has no corresponding order and is never looked up.
    pub fn lot_for_intensity(&self, intensity: u8) -> Option<f64> {
        self.lot_mapping.get(&intensity).copied()
    }
}

fn default_dd_limit_pct() -> f64 {
    10.0
}

fn default_dd_emergency_pct() -> f64 {
    20.0
}

fn default_initial_balance() -> f64 {
    10_000.0
}

fn default_max_consecutive_losses() -> u32 {
    5
}

/// The reserved `_risk` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    #[serde(default = "default_dd_limit_pct")]
    pub dd_limit_pct: f64,
    #[serde(default = "default_dd_emergency_pct")]
    pub dd_emergency_pct: f64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            dd_limit_pct: default_dd_limit_pct(),
            dd_emergency_pct: default_dd_emergency_pct(),
            initial_balance: default_initial_balance(),
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

/// The full symbol configuration document.
#[derive(Debug, Clone, Default)]
pub struct SymbolConfigSet {
    pub symbols: HashMap<String, SymbolEntry>,
    pub risk: RiskParams,
}

/// On-disk shape: a flat map with one reserved `_risk` key, matching the
/// document format in the external-interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RawDocument {
    #[serde(flatten)]
    entries: HashMap<String, serde_json::Value>,
}

const RESERVED_RISK_KEY: &str = "_risk";

impl SymbolConfigSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let raw: RawDocument = serde_json::from_str(&content)?;

        let mut symbols = HashMap::new();
        let mut risk = RiskParams::default();

        for (key, value) in raw.entries {
            if key == RESERVED_RISK_KEY {
                risk = serde_json::from_value(value)?;
            } else {
                let entry: SymbolEntry = serde_json::from_value(value)?;
                symbols.insert(key, entry);
            }
        }

        info!(path = %path.display(), symbol_count = symbols.len(), "symbol config loaded");
        Ok(Self { symbols, risk })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut entries = HashMap::new();
        for (symbol, entry) in &self.symbols {
            entries.insert(symbol.clone(), serde_json::to_value(entry)?);
        }
        entries.insert(RESERVED_RISK_KEY.to_string(), serde_json::to_value(&self.risk)?);

        let content = serde_json::to_string_pretty(&entries)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), "symbol config saved (atomic)");
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolEntry> {
        self.symbols.get(symbol)
    }

    pub fn is_enabled(&self, symbol: &str) -> bool {
        self.symbols.get(symbol).map(|e| e.enabled).unwrap_or(false)
    }
}
