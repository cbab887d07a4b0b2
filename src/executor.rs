// =============================================================================
// Executor — reconciles signals against the broker, applies risk gates,
// and submits orders
// =============================================================================
//
// Redesigned from the teacher's `execution::ExecutionEngine`, which branches
// demo/live inside `execute_proposal`; here sync-state reconciliation
// (§ sync.rs) replaces that branch entirely, and every path funnels through
// the same `BrokerBridge`, whether that bridge is backed by a mock or a
// live connector.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::broker::{BrokerBridge, BrokerSdk};
use crate::error::RiskError;
use crate::price_converter::{self, SymbolPricing};
use crate::risk::{RiskContext, RiskGuard};
use crate::symbol_config::SymbolConfigSet;
use crate::sync::{Decision, SyncState};
use crate::types::Signal;

/// Shared read-mostly map of `symbol -> spread_pips`, written by the
/// orchestrator's spread-refresh loop and read here — never re-derived from
/// the (possibly 10-minute-stale) symbol-metadata cache.
pub type SpreadMap = Arc<RwLock<HashMap<String, f64>>>;

/// Acknowledgement returned for every processed signal, within bounded time.
/// `SkipRisk` carries the typed gate failure (not just its rendered reason)
/// so the orchestrator can react specifically to `Emergency` — flatten and
/// halt — without re-parsing a string.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    SkipDisabled,
    SkipPaused,
    SkipZeroLot,
    SkipRisk(RiskError),
    OkSynced,
    OkClosed { ticket: u64 },
    OkWaitingSync,
    OkOpened { ticket: u64, fill_price: f64 },
    Error(String),
}

const AUDIT_COMMENT_VERSION: &str = "1";
const AUDIT_COMMENT_MAX_LEN: usize = 100;

/// Build the compact, fixed-schema audit comment attached to every order:
/// `O|<ver>|<hmm_state>|<action_idx>|<intensity>|<balance_int>|<dd_pct_1dp>|<vpnl_2dp>`.
pub fn build_audit_comment(hmm_state: usize, action_idx: usize, intensity: u8, balance: f64, dd_pct: f64, vpnl: f64) -> String {
    let comment = format!(
        "O|{}|{}|{}|{}|{}|{:.1}|{:.2}",
        AUDIT_COMMENT_VERSION,
        hmm_state,
        action_idx,
        intensity,
        balance.round() as i64,
        dd_pct,
        vpnl
    );
    if comment.len() > AUDIT_COMMENT_MAX_LEN {
        comment[..AUDIT_COMMENT_MAX_LEN].to_string()
    } else {
        comment
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAuditComment {
    pub version: String,
    pub hmm_state: usize,
    pub action_idx: usize,
    pub intensity: u8,
    pub balance_int: i64,
    pub dd_pct: f64,
    pub vpnl: f64,
}

pub fn parse_audit_comment(comment: &str) -> Option<ParsedAuditComment> {
    let mut parts = comment.split('|');
    if parts.next()? != "O" {
        return None;
    }
    Some(ParsedAuditComment {
        version: parts.next()?.to_string(),
        hmm_state: parts.next()?.parse().ok()?,
        action_idx: parts.next()?.parse().ok()?,
        intensity: parts.next()?.parse().ok()?,
        balance_int: parts.next()?.parse().ok()?,
        dd_pct: parts.next()?.parse().ok()?,
        vpnl: parts.next()?.parse().ok()?,
    })
}

/// Per-symbol executor state: sync state and symbol config are exclusively
/// owned here, never shared with the predictor.
pub struct Executor<S: BrokerSdk> {
    bridge: std::sync::Arc<BrokerBridge<S>>,
    risk: std::sync::Arc<RiskGuard>,
    symbol_configs: SymbolConfigSet,
    spread_map: SpreadMap,
    sync_states: std::collections::HashMap<String, SyncState>,
    paused: bool,
}

impl<S: BrokerSdk> Executor<S> {
    pub fn new(bridge: std::sync::Arc<BrokerBridge<S>>, risk: std::sync::Arc<RiskGuard>, symbol_configs: SymbolConfigSet, spread_map: SpreadMap, paused: bool) -> Self {
        Self {
            bridge,
            risk,
            symbol_configs,
            spread_map,
            sync_states: std::collections::HashMap::new(),
            paused,
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub async fn handle_signal(&mut self, signal: &Signal, action_idx: usize) -> Ack {
        let Some(entry) = self.symbol_configs.get(&signal.symbol) else {
            return Ack::SkipDisabled;
        };
        if !entry.enabled {
            return Ack::SkipDisabled;
        }
        if self.paused {
            return Ack::SkipPaused;
        }

        let real_position = match self.bridge.get_positions().await {
            Ok(positions) => positions.into_iter().find(|p| p.symbol == signal.symbol),
            Err(err) => return Ack::Error(err.to_string()),
        };
        let real_direction = real_position.as_ref().map(|p| p.direction);

        let sync_state = self.sync_states.entry(signal.symbol.clone()).or_default();
        let (decision, should_open) = sync_state.evaluate(real_direction, signal.direction);

        match decision {
            Decision::Noop => Ack::OkSynced,
            Decision::Close => {
                let Some(position) = real_position else {
                    return Ack::OkSynced;
                };
                match self.bridge.close_order(position.ticket).await {
                    Ok(result) => {
                        // Realized PnL bookkeeping happens where the fill
                        // price is compared against entry; the sign alone
                        // is enough to drive the circuit breaker here.
                        let pnl = (result.fill_price - position.entry_price) * position.direction as f64;
                        self.risk.record_result(pnl, Utc::now());
                        Ack::OkClosed { ticket: result.ticket }
                    }
                    Err(err) => Ack::Error(err.to_string()),
                }
            }
            Decision::WaitSync if !should_open => Ack::OkWaitingSync,
            Decision::WaitSync | Decision::Open => self.open_fresh_position(signal, action_idx).await,
        }
    }

    async fn open_fresh_position(&mut self, signal: &Signal, action_idx: usize) -> Ack {
        let entry = self.symbol_configs.get(&signal.symbol).expect("checked enabled above").clone();
        let Some(volume) = entry.lot_for_intensity(signal.intensity) else {
            return Ack::SkipZeroLot;
        };
        if volume == 0.0 {
            return Ack::SkipZeroLot;
        }

        let account = match self.bridge.get_account().await {
            Ok(account) => account,
            Err(err) => return Ack::Error(err.to_string()),
        };

        let symbol_info = match self.bridge.get_symbol_info(&signal.symbol).await {
            Ok(info) => info,
            Err(err) => return Ack::Error(err.to_string()),
        };

        // Read from the spread-refresh loop's shared map, not from the
        // symbol-metadata cache: that cache's TTL (10 min) is far longer
        // than a spread is allowed to go stale for a risk decision. A
        // symbol the refresh loop hasn't reached yet reads as unknown,
        // which the risk guard fails closed on by default.
        let spread_pips = self.spread_map.read().get(&signal.symbol).copied();

        let required_margin = volume * symbol_info.contract_size * symbol_info.margin_rate;
        let risk_ctx = RiskContext {
            equity: account.equity,
            free_margin: account.free_margin,
            required_margin,
            spread_pips,
            max_spread_pips: entry.max_spread_pips,
        };

        if let Err(err) = self.risk.check(risk_ctx, Utc::now()) {
            return Ack::SkipRisk(err);
        }

        let pricing = SymbolPricing {
            pip_value_per_lot: symbol_info.pip_value_per_lot,
            digits: Some(symbol_info.digits),
        };
        let stop_target = match price_converter::convert(
            &signal.symbol,
            signal.close_price,
            signal.direction,
            volume,
            entry.sl_usd,
            entry.tp_usd,
            pricing,
        ) {
            Ok(st) => st,
            Err(err) => return Ack::Error(err.to_string()),
        };

        let dd_pct = (self.symbol_configs.risk.initial_balance - account.equity) / self.symbol_configs.risk.initial_balance * 100.0;
        let comment = build_audit_comment(signal.hmm_state, action_idx, signal.intensity, account.balance, dd_pct, signal.virtual_pnl);

        match self
            .bridge
            .open_order(&signal.symbol, signal.direction, volume, stop_target.sl_price, stop_target.tp_price, &comment)
            .await
        {
            Ok(result) => Ack::OkOpened { ticket: result.ticket, fill_price: result.fill_price },
            Err(err) => Ack::Error(err.to_string()),
        }
    }
}
