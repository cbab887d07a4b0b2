// =============================================================================
// Orchestrator — bootstraps the per-symbol pipelines and owns the loops
// that are not single-symbol: spread refresh, heartbeat, shutdown
// =============================================================================
//
// Redesigned from the teacher's `main.rs` spawn sequence (market-data streams
// + strategy loop + exit monitor + reconciliation loop, each a detached
// `tokio::spawn` with its own retry sleep). The same fan-out-of-tasks shape
// is kept; what changes is what each task does and the addition of a single
// shared shutdown signal every task observes at its next suspension point.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::bar_detector::BarDetector;
use crate::broker::{BrokerBridge, BrokerSdk};
use crate::config::MainConfig;
use crate::error::RiskError;
use crate::executor::{Ack, Executor, SpreadMap};
use crate::model_bundle::ModelBundle;
use crate::paper_trader::PaperTrader;
use crate::predictor::Predictor;
use crate::risk::RiskGuard;
use crate::session::Session;
use crate::symbol_config::SymbolConfigSet;
use crate::telemetry::{TelemetryEvent, TelemetryPublisher};
use crate::types::TradingMode;

const SPREAD_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const WARMUP_BAR_COUNT: usize = 500;

fn timeframe_to_seconds(timeframe: &str) -> i64 {
    match timeframe {
        "M1" => 60,
        "M5" => 300,
        "M15" => 900,
        "M30" => 1800,
        "H1" => 3600,
        "H4" => 14_400,
        "D1" => 86_400,
        _ => 300,
    }
}

/// Close every open position for one symbol, leaving trading mode and the
/// session untouched. Used for the day-change flatten, where only this
/// symbol's book needs clearing, not the whole account.
async fn close_symbol_positions<S: BrokerSdk>(bridge: &BrokerBridge<S>, symbol: &str) {
    match bridge.get_positions().await {
        Ok(positions) => {
            for position in positions.into_iter().filter(|p| p.symbol == symbol) {
                if let Err(err) = bridge.close_order(position.ticket).await {
                    error!(symbol = %symbol, ticket = position.ticket, error = %err, "failed to close position on day-change flatten");
                }
            }
        }
        Err(err) => error!(symbol = %symbol, error = %err, "failed to fetch positions for day-change flatten"),
    }
}

/// Emergency-drawdown response: halt new entries and close every open
/// position across every symbol, then persist the session as stopped.
/// Idempotent enough to call from more than one symbol task at once — a
/// second flatten finds no positions left and a session already stopped.
async fn flatten_and_halt<S: BrokerSdk>(bridge: Arc<BrokerBridge<S>>, session: Arc<Mutex<Session>>, trading_mode: Arc<RwLock<TradingMode>>) {
    *trading_mode.write() = TradingMode::Killed;

    match bridge.get_positions().await {
        Ok(positions) => {
            for position in positions {
                if let Err(err) = bridge.close_order(position.ticket).await {
                    error!(ticket = position.ticket, error = %err, "failed to close position during emergency flatten");
                }
            }
        }
        Err(err) => error!(error = %err, "failed to fetch positions during emergency flatten"),
    }

    let now = Utc::now().timestamp();
    if let Err(err) = session.lock().await.mark_stopped(now, "Emergency") {
        error!(error = %err, "failed to persist session stop during emergency flatten");
    }
}


/// Wires together every building-block module into the running system. One
/// `Orchestrator` per process.
pub struct Orchestrator<S: BrokerSdk> {
    config: MainConfig,
    symbol_configs: SymbolConfigSet,
    bridge: Arc<BrokerBridge<S>>,
    risk: Arc<RiskGuard>,
    executor: Arc<Mutex<Executor<S>>>,
    paper_trader: Arc<Mutex<PaperTrader>>,
    telemetry: Arc<TelemetryPublisher>,
    spread_map: SpreadMap,
    session: Arc<Mutex<Session>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    trading_mode: Arc<RwLock<TradingMode>>,
}

impl<S: BrokerSdk + 'static> Orchestrator<S> {
    pub fn new(config: MainConfig, symbol_configs: SymbolConfigSet, bridge: Arc<BrokerBridge<S>>, session_path: impl AsRef<std::path::Path>, dry_run: bool) -> Self {
        let risk = Arc::new(RiskGuard::new(
            symbol_configs.risk.initial_balance,
            symbol_configs.risk.dd_limit_pct,
            symbol_configs.risk.dd_emergency_pct,
            symbol_configs.risk.max_consecutive_losses,
        ));

        let initial_mode = if dry_run || config.trading.start_paused {
            TradingMode::Paused
        } else {
            TradingMode::Live
        };

        let spread_map: SpreadMap = Arc::new(RwLock::new(HashMap::new()));

        let executor = Arc::new(Mutex::new(Executor::new(
            bridge.clone(),
            risk.clone(),
            symbol_configs.clone(),
            spread_map.clone(),
            initial_mode != TradingMode::Live,
        )));

        let telemetry = Arc::new(TelemetryPublisher::spawn(config.persistence.endpoint.clone(), config.persistence.retry_queue_capacity));

        let symbols: Vec<String> = symbol_configs.symbols.keys().cloned().collect();
        let now = Utc::now().timestamp();
        let session = Arc::new(Mutex::new(Session::bootstrap(session_path, symbol_configs.risk.initial_balance, symbols, now)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            symbol_configs,
            bridge,
            risk,
            executor,
            paper_trader: Arc::new(Mutex::new(PaperTrader::new())),
            telemetry,
            spread_map,
            session,
            shutdown_tx,
            shutdown_rx,
            trading_mode: Arc::new(RwLock::new(initial_mode)),
        }
    }

    pub fn spread_map(&self) -> SpreadMap {
        self.spread_map.clone()
    }

    /// Bootstrap the broker connection, then start every symbol pipeline and
    /// auxiliary loop. The connection must be established first: every other
    /// SDK call depends on it.
    pub async fn run(&mut self, models_dir: &str) -> anyhow::Result<()> {
        self.bridge.connect().await?;
        info!("broker bridge connected; beginning symbol bootstrap");

        let timeframe = self.config.trading.timeframe.clone();
        let period = timeframe_to_seconds(&timeframe);

        let symbols: Vec<String> = self.symbol_configs.symbols.keys().cloned().collect();
        for symbol in &symbols {
            if !self.symbol_configs.is_enabled(symbol) {
                info!(symbol = %symbol, "symbol disabled in config, skipping bootstrap");
                continue;
            }
            let bundle_path = std::path::Path::new(models_dir).join(format!("{symbol}_{timeframe}.zip"));
            let bundle = match ModelBundle::load(&bundle_path) {
                Ok(b) => b,
                Err(err) => {
                    error!(symbol = %symbol, error = %err, "model bundle load failed; skipping symbol");
                    continue;
                }
            };
            {
                let mut trader = self.paper_trader.lock().await;
                trader.register_symbol(symbol.clone(), bundle.metadata.cost_params());
            }
            self.spawn_symbol(symbol.clone(), bundle, period, &timeframe).await;
        }

        self.spawn_spread_refresh_loop(symbols.clone());
        self.spawn_heartbeat_loop();

        Ok(())
    }

    async fn spawn_symbol(&self, symbol: String, bundle: ModelBundle, period: i64, timeframe: &str) {
        let mut predictor = Predictor::new(symbol.clone(), WARMUP_BAR_COUNT, bundle);

        match self.bridge.get_history(&symbol, timeframe, WARMUP_BAR_COUNT).await {
            Ok(history) => {
                if let Err(err) = predictor.warmup(history) {
                    warn!(symbol = %symbol, error = %err, "warmup rejected a bar; continuing from partial state");
                }
            }
            Err(err) => warn!(symbol = %symbol, error = %err, "historical warmup fetch failed; starting cold"),
        }

        let mut receiver = match self.bridge.subscribe_bars(&symbol).await {
            Ok(rx) => rx,
            Err(err) => {
                error!(symbol = %symbol, error = %err, "bar subscription failed; symbol will not trade");
                return;
            }
        };

        let executor = self.executor.clone();
        let paper_trader = self.paper_trader.clone();
        let telemetry = self.telemetry.clone();
        let trading_mode = self.trading_mode.clone();
        let bridge = self.bridge.clone();
        let session = self.session.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let close_on_day_change = self.config.trading.close_on_day_change;

        tokio::spawn(async move {
            let mut detector = BarDetector::new(period);
            let mut last_day: Option<u32> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(symbol = %symbol, "symbol task observed shutdown signal");
                            return;
                        }
                    }
                    tick = receiver.recv() => {
                        let Some(tick) = tick else {
                            warn!(symbol = %symbol, "tick stream closed");
                            return;
                        };
                        let Some(bar) = detector.on_tick(tick.epoch_seconds, tick.mid(), 0.0) else {
                            continue;
                        };

                        if close_on_day_change {
                            let day = Utc.timestamp_opt(bar.epoch_seconds, 0).single().map(|dt| dt.ordinal()).unwrap_or(0);
                            if let Some(prev) = last_day {
                                if prev != day {
                                    info!(symbol = %symbol, "day boundary crossed; flattening open position");
                                    close_symbol_positions(&bridge, &symbol).await;
                                }
                            }
                            last_day = Some(day);
                        }

                        let signal = match predictor.on_bar(bar) {
                            Ok(Some(signal)) => signal,
                            Ok(None) => continue,
                            Err(err) => {
                                warn!(symbol = %symbol, error = %err, "bar rejected by buffer");
                                continue;
                            }
                        };

                        if let Some(trade) = paper_trader.lock().await.record(&signal) {
                            telemetry.enqueue(TelemetryEvent::from_paper_trade(&trade));
                        }

                        if *trading_mode.read() == TradingMode::Killed {
                            continue;
                        }

                        let action_idx = signal.action as usize;
                        let ack = executor.lock().await.handle_signal(&signal, action_idx).await;
                        match &ack {
                            Ack::Error(reason) => warn!(symbol = %symbol, reason = %reason, "executor ACK error"),
                            Ack::SkipRisk(RiskError::Emergency { dd_pct, limit_pct }) => {
                                error!(symbol = %symbol, dd_pct, limit_pct, "emergency drawdown breached");
                                flatten_and_halt(bridge.clone(), session.clone(), trading_mode.clone()).await;
                            }
                            Ack::SkipRisk(reason) => info!(symbol = %symbol, reason = %reason, "executor skipped on risk gate"),
                            _ => {}
                        }
                    }
                }
            }
        });
    }

    fn spawn_spread_refresh_loop(&self, symbols: Vec<String>) {
        let bridge = self.bridge.clone();
        let spread_map = self.spread_map.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SPREAD_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        for symbol in &symbols {
                            match bridge.get_spread_pips(symbol).await {
                                Ok(pips) => {
                                    spread_map.write().insert(symbol.clone(), pips);
                                }
                                Err(err) => {
                                    warn!(symbol = %symbol, error = %err, "spread refresh fetch failed; leaving prior value (or unknown)");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_heartbeat_loop(&self) {
        let session = self.session.clone();
        let interval_s = self.config.health.heartbeat_interval_s;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_s));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        let now = Utc::now().timestamp();
                        if let Err(err) = session.lock().await.heartbeat(now) {
                            error!(error = %err, "failed to persist heartbeat");
                        }
                    }
                }
            }
        });
    }

    /// Trip the shared shutdown signal and wait up to `shutdown_grace_s` for
    /// tasks to observe it before returning regardless.
    pub async fn shutdown(&mut self) {
        warn!("shutdown requested; signalling tasks");
        let _ = self.shutdown_tx.send(true);

        let grace = Duration::from_secs(self.config.shutdown_grace_s);
        tokio::time::sleep(grace).await;

        let now = Utc::now().timestamp();
        if let Err(err) = self.session.lock().await.mark_stopped(now, "Shutdown") {
            error!(error = %err, "failed to persist session stop");
        }
        info!("shutdown grace period elapsed; exiting");
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        *self.trading_mode.write() = mode;
        self.executor.try_lock().map(|mut e| e.set_paused(mode != TradingMode::Live)).ok();
    }

    pub fn risk_guard(&self) -> Arc<RiskGuard> {
        self.risk.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_seconds_known_values() {
        assert_eq!(timeframe_to_seconds("M1"), 60);
        assert_eq!(timeframe_to_seconds("M5"), 300);
        assert_eq!(timeframe_to_seconds("H1"), 3600);
    }

    #[test]
    fn unknown_timeframe_falls_back_to_m5() {
        assert_eq!(timeframe_to_seconds("weird"), 300);
    }
}
