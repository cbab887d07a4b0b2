// =============================================================================
// End-to-end scenarios exercising the executor, risk guard, and broker
// bridge together through the public crate surface.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use meridian_core::broker::{BrokerBridge, MockBrokerSdk, SymbolMetadata};
use meridian_core::error::RiskError;
use meridian_core::executor::{Ack, Executor, SpreadMap};
use meridian_core::price_converter::{self, SymbolPricing};
use meridian_core::risk::RiskGuard;
use meridian_core::symbol_config::{RiskParams, SymbolConfigSet, SymbolEntry};
use meridian_core::types::{Action, Signal};

fn eurusd_metadata() -> SymbolMetadata {
    SymbolMetadata {
        digits: 5,
        pip_value_per_lot: Some(10.0),
        spread_points: 10.0,
        point: 0.0001,
        contract_size: 100_000.0,
        margin_rate: 0.02,
    }
}

fn symbol_configs(risk: RiskParams) -> SymbolConfigSet {
    let mut symbols = HashMap::new();
    let mut lot_mapping = HashMap::new();
    lot_mapping.insert(1, 0.01);
    lot_mapping.insert(2, 0.02);
    lot_mapping.insert(3, 0.05);
    symbols.insert(
        "EURUSD".to_string(),
        SymbolEntry {
            enabled: true,
            lot_mapping,
            sl_usd: 50.0,
            tp_usd: 100.0,
            max_spread_pips: 3.0,
        },
    );
    SymbolConfigSet { symbols, risk }
}

fn default_risk() -> RiskParams {
    RiskParams {
        dd_limit_pct: 5.0,
        dd_emergency_pct: 10.0,
        initial_balance: 10_000.0,
        max_consecutive_losses: 5,
    }
}

fn signal(action: Action) -> Signal {
    Signal::new("EURUSD", action, 1, 0.0, 1_000, 1.10000)
}

fn spread_map_with_eurusd(pips: f64) -> SpreadMap {
    let map = Arc::new(RwLock::new(HashMap::new()));
    map.write().insert("EURUSD".to_string(), pips);
    map
}

fn executor_for(bridge: Arc<BrokerBridge<MockBrokerSdk>>, risk: Arc<RiskGuard>, configs: SymbolConfigSet) -> Executor<MockBrokerSdk> {
    Executor::new(bridge, risk, configs, spread_map_with_eurusd(1.0), false)
}

/// S1 — flat account, WAIT signal: no action is taken.
#[tokio::test]
async fn s1_flat_account_wait_signal_is_noop() {
    let configs = symbol_configs(default_risk());
    let sdk = Arc::new(MockBrokerSdk::new(10_000.0).with_symbol("EURUSD", eurusd_metadata()));
    let bridge = Arc::new(BrokerBridge::new(sdk, Duration::from_secs(2)));
    bridge.connect().await.unwrap();
    let risk = Arc::new(RiskGuard::new(10_000.0, 5.0, 10.0, 5));
    let mut executor = executor_for(bridge, risk, configs);

    let ack = executor.handle_signal(&signal(Action::Wait), 0).await;
    assert_eq!(ack, Ack::OkSynced);
}

/// S2 — a missed entry latches and only opens once the signal direction
/// actually changes (the "edge"), never chasing the original move.
#[tokio::test]
async fn s2_missed_entry_waits_for_direction_edge() {
    let configs = symbol_configs(default_risk());
    let sdk = Arc::new(MockBrokerSdk::new(10_000.0).with_symbol("EURUSD", eurusd_metadata()));
    let bridge = Arc::new(BrokerBridge::new(sdk, Duration::from_secs(2)));
    bridge.connect().await.unwrap();
    let risk = Arc::new(RiskGuard::new(10_000.0, 5.0, 10.0, 5));
    let mut executor = executor_for(bridge, risk, configs);

    // Bar 1: model says LONG, no real position yet -> latch, wait.
    let ack1 = executor.handle_signal(&signal(Action::LongModerate), 1).await;
    assert_eq!(ack1, Ack::OkWaitingSync);

    // Bar 2: model still says LONG -> still waiting, no chase.
    let ack2 = executor.handle_signal(&signal(Action::LongModerate), 1).await;
    assert_eq!(ack2, Ack::OkWaitingSync);

    // Bar 3: same direction again, unchanged.
    let ack3 = executor.handle_signal(&signal(Action::LongModerate), 1).await;
    assert_eq!(ack3, Ack::OkWaitingSync);

    // Bar 4: the edge -- direction flips to SHORT -> opens fresh.
    let ack4 = executor.handle_signal(&signal(Action::ShortModerate), 2).await;
    assert!(matches!(ack4, Ack::OkOpened { .. }), "expected a fresh open on the direction edge, got {ack4:?}");
}

/// S3 — an inversion against a real position closes it, then the next
/// signal (still opposite direction, now flat) waits for its own edge
/// rather than reopening immediately.
#[tokio::test]
async fn s3_inversion_closes_then_waits_for_resync() {
    let configs = symbol_configs(default_risk());
    let sdk = Arc::new(MockBrokerSdk::new(10_000.0).with_symbol("EURUSD", eurusd_metadata()));
    let bridge = Arc::new(BrokerBridge::new(sdk, Duration::from_secs(2)));
    bridge.connect().await.unwrap();

    // Seed a real long position directly through the bridge, bypassing the
    // executor, to simulate one already open at startup.
    bridge.open_order("EURUSD", 1, 0.02, None, None, "seed").await.unwrap();

    let risk = Arc::new(RiskGuard::new(10_000.0, 5.0, 10.0, 5));
    let mut executor = executor_for(bridge, risk, configs);

    // Model flips to SHORT while a real LONG is open -> close.
    let ack1 = executor.handle_signal(&signal(Action::ShortModerate), 5).await;
    assert!(matches!(ack1, Ack::OkClosed { .. }), "expected the inverted signal to close the real position, got {ack1:?}");

    // Next bar: still SHORT, now flat -> this is a fresh latch, not a reopen.
    let ack2 = executor.handle_signal(&signal(Action::ShortModerate), 5).await;
    assert_eq!(ack2, Ack::OkWaitingSync, "must wait for its own edge rather than reopening on the same bar the close happened");
}

/// S4 — an emergency drawdown breach fails any attempt to open, and the
/// failure is the precise, typed `Emergency` variant (not an arbitrary
/// drawdown-limit skip).
#[tokio::test]
async fn s4_emergency_drawdown_blocks_new_entries() {
    let configs = symbol_configs(default_risk());
    // Equity of 8,900 against an initial balance of 10,000 is an 11% drawdown,
    // past the 10% emergency threshold configured above.
    let sdk = Arc::new(MockBrokerSdk::new(8_900.0).with_symbol("EURUSD", eurusd_metadata()));
    let bridge = Arc::new(BrokerBridge::new(sdk, Duration::from_secs(2)));
    bridge.connect().await.unwrap();
    let risk = Arc::new(RiskGuard::new(10_000.0, 5.0, 10.0, 5));
    let mut executor = executor_for(bridge, risk, configs);

    let ack = executor.handle_signal(&signal(Action::LongStrong), 3).await;
    match ack {
        Ack::SkipRisk(RiskError::Emergency { dd_pct, limit_pct }) => {
            assert!((dd_pct - 11.0).abs() < 1e-9);
            assert!((limit_pct - 10.0).abs() < 1e-9);
        }
        other => panic!("expected an emergency-drawdown skip, got {other:?}"),
    }
}

/// S5 — USD-denominated stop distance converts to the exact absolute price
/// the documented worked example specifies: EURUSD, long, entry 1.10000,
/// 0.03 lots, $10 stop, pip value $10/lot, 5 digits -> 33.33 pip distance,
/// SL at 1.09667.
#[test]
fn s5_usd_stop_converts_to_documented_price() {
    let result = price_converter::convert(
        "EURUSD",
        1.10000,
        1,
        0.03,
        10.0,
        0.0,
        SymbolPricing {
            pip_value_per_lot: Some(10.0),
            digits: Some(5),
        },
    )
    .unwrap();

    let sl = result.sl_price.expect("sl_usd was nonzero, a stop price must be produced");
    assert!((sl - 1.09667).abs() < 1e-5, "expected sl_price close to 1.09667, got {sl}");
}

/// S6 — reconnecting the bridge invalidates the stale symbol-metadata
/// cache and leaves subscriptions usable afterwards.
#[tokio::test]
async fn s6_reconnect_invalidates_cache_and_preserves_subscribe_capability() {
    let sdk = Arc::new(MockBrokerSdk::new(10_000.0).with_symbol("EURUSD", eurusd_metadata()));
    let bridge = Arc::new(BrokerBridge::new(sdk, Duration::from_secs(2)));
    bridge.connect().await.unwrap();

    let before = bridge.get_symbol_info("EURUSD").await.unwrap();
    assert_eq!(before.digits, 5);

    // A subscription exists before the drop.
    let _receiver = bridge.subscribe_bars("EURUSD").await.unwrap();

    bridge.reconnect_with_backoff().await;
    assert_eq!(bridge.state(), meridian_core::broker::ConnectionState::Connected);

    // Ordinary traffic (a fresh symbol-info fetch, a fresh subscription)
    // still works after reconnect; the cache invalidation itself is
    // covered at the unit level in broker::bridge.
    let after = bridge.get_symbol_info("EURUSD").await.unwrap();
    assert_eq!(after.digits, 5);
    let _receiver_again = bridge.subscribe_bars("EURUSD").await.unwrap();
}
