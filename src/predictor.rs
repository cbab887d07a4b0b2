// =============================================================================
// Predictor — per-symbol pipeline invoked on each closed bar
// =============================================================================
//
// Single-writer per symbol: the bar-processing task owns the buffer, the
// virtual position, and the model bundle handle for its symbol exclusively.
// Different symbols run this pipeline concurrently on independent tasks.
// =============================================================================

use chrono::{TimeZone, Timelike, Utc};
use tracing::debug;

use crate::bar_buffer::BarBuffer;
use crate::error::BarError;
use crate::features::{hmm_features, policy_features};
use crate::model_bundle::ModelBundle;
use crate::types::{Bar, Signal};
use crate::virtual_position::VirtualPosition;

/// Owns everything the pipeline needs for one symbol.
pub struct Predictor {
    symbol: String,
    buffer: BarBuffer,
    position: VirtualPosition,
    bundle: ModelBundle,
}

impl Predictor {
    pub fn new(symbol: impl Into<String>, capacity: usize, bundle: ModelBundle) -> Self {
        let position = VirtualPosition::new(bundle.metadata.cost_params());
        Self {
            symbol: symbol.into(),
            buffer: BarBuffer::new(capacity),
            position,
            bundle,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Run the pipeline for one newly closed bar. Returns `None` while the
    /// buffer is still warming up, `Some(Signal)` once it is ready.
    pub fn on_bar(&mut self, bar: Bar) -> Result<Option<Signal>, BarError> {
        self.buffer.push(bar)?;
        if !self.buffer.ready() {
            return Ok(None);
        }
        Ok(Some(self.infer_and_update(bar, true)))
    }

    /// Fast-forward through a historical list of bars silently — no Signal
    /// is emitted, but buffer/virtual-position state ends exactly where
    /// live processing would have left it. Used after cold start or crash
    /// recovery so the policy's position feature reflects what it "would
    /// have been holding."
    pub fn warmup(&mut self, bars: impl IntoIterator<Item = Bar>) -> Result<(), BarError> {
        for bar in bars {
            self.buffer.push(bar)?;
            if self.buffer.ready() {
                self.infer_and_update(bar, false);
            }
        }
        Ok(())
    }

    fn infer_and_update(&mut self, bar: Bar, emit: bool) -> Signal {
        let snapshot = self.buffer.snapshot();
        let hmm_periods = self.bundle.metadata.hmm_periods();
        let hmm_feats = hmm_features(&snapshot, hmm_periods);
        let hmm_state = self
            .bundle
            .hmm_predict([hmm_feats.momentum, hmm_feats.consistency, hmm_feats.range_position]);

        let policy_periods = self.bundle.metadata.policy_periods();
        let hour_of_day = Utc
            .timestamp_opt(bar.epoch_seconds, 0)
            .single()
            .map(|dt| dt.hour())
            .unwrap_or(0);

        let features = policy_features(
            &snapshot,
            policy_periods,
            hour_of_day,
            hmm_state,
            self.bundle.metadata.hmm.n_states,
            self.position.direction(),
            self.position.intensity(),
            self.position.floating_pnl(),
        );

        let action_index = self.bundle.policy_predict(&features, true);
        let action = self
            .bundle
            .metadata
            .action_for_index(action_index)
            .expect("policy_predict must only emit indices present in the bundle's action table");

        let realized = self.position.update(action, bar.close);

        if emit {
            debug!(symbol = %self.symbol, action = %action, hmm_state, realized, "predictor emitted signal");
        }

        Signal::new(self.symbol.clone(), action, hmm_state, self.position.floating_pnl(), bar.epoch_seconds, bar.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_bundle::{ActionTableEntry, BundleMetadata, DataProvenance, HmmConfig, HmmStateAnalysis, RlConfig};
    use std::collections::HashSet;

    fn metadata() -> BundleMetadata {
        BundleMetadata {
            format_version: "2.0".into(),
            symbol: "EURUSD".into(),
            point: 0.0001,
            pip_value: 10.0,
            spread_points: 2.0,
            slippage_points: 1.0,
            commission_per_lot: 7.0,
            digits: 5,
            initial_balance: 10_000.0,
            lot_sizes: [0.0, 0.01, 0.02, 0.05],
            total_timesteps: 1,
            hmm: HmmConfig {
                n_states: 4,
                momentum_period: 5,
                consistency_period: 5,
                range_period: 5,
            },
            rl: RlConfig {
                roc_period: 5,
                atr_period: 5,
                ema_period: 5,
                range_period: 5,
                volume_ma_period: 5,
            },
            action_table: vec![
                ActionTableEntry { name: "WAIT".into(), direction: 0, intensity: 0 },
                ActionTableEntry { name: "LONG_WEAK".into(), direction: 1, intensity: 1 },
                ActionTableEntry { name: "LONG_MODERATE".into(), direction: 1, intensity: 2 },
                ActionTableEntry { name: "LONG_STRONG".into(), direction: 1, intensity: 3 },
                ActionTableEntry { name: "SHORT_WEAK".into(), direction: -1, intensity: 1 },
                ActionTableEntry { name: "SHORT_MODERATE".into(), direction: -1, intensity: 2 },
                ActionTableEntry { name: "SHORT_STRONG".into(), direction: -1, intensity: 3 },
            ],
            hmm_state_analysis: HmmStateAnalysis {
                bull_states: HashSet::from([0]),
                bear_states: HashSet::from([1]),
                range_states: HashSet::from([2, 3]),
            },
            provenance: DataProvenance {
                date_start: "2020-01-01".into(),
                date_end: "2021-01-01".into(),
                train_bars: 1,
                validation_bars: 1,
                test_bars: 1,
            },
        }
    }

    #[test]
    fn buffer_not_ready_returns_none() {
        let mut buf = BarBuffer::new(10);
        for i in 0..5 {
            buf.push(Bar { epoch_seconds: i * 60, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 }).unwrap();
        }
        assert!(!buf.ready());
    }

    #[test]
    fn metadata_action_table_round_trips_canonical_actions() {
        let meta = metadata();
        for (idx, entry) in meta.action_table.iter().enumerate() {
            let action = meta.action_for_index(idx).unwrap();
            assert_eq!(action.name(), entry.name);
        }
    }

    fn build_bundle(dir: &std::path::Path, name: &str) -> ModelBundle {
        use std::io::Write;
        use zip::write::FileOptions;

        let path = dir.join(name);
        let comment = serde_json::to_string(&metadata()).unwrap();

        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: FileOptions<()> = FileOptions::default();
        writer.start_file("hmm_weights.bin", options).unwrap();
        writer.write_all(&[1, 2, 3, 4]).unwrap();
        writer.start_file("policy_weights.bin", options).unwrap();
        writer.write_all(&[5, 6, 7, 8, 9]).unwrap();
        writer.set_comment(comment);
        writer.finish().unwrap();

        ModelBundle::load(&path).unwrap()
    }

    fn bar(i: i64, close: f64) -> Bar {
        Bar { epoch_seconds: i * 300, open: close, high: close, low: close, close, volume: 10.0 }
    }

    #[test]
    fn on_bar_emits_a_signal_once_the_buffer_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_bundle(dir.path(), "EURUSD_M5.zip");
        let mut predictor = Predictor::new("EURUSD", 5, bundle);

        let mut last = None;
        for i in 0..10 {
            last = predictor.on_bar(bar(i, 1.1000 + i as f64 * 0.0001)).unwrap();
        }
        assert!(last.is_some(), "expected a signal once the buffer had filled");
        let signal = last.unwrap();
        assert_eq!(signal.symbol, "EURUSD");
    }

    #[test]
    fn warmup_then_on_bar_leaves_buffer_ready_and_emits() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_bundle(dir.path(), "EURUSD_M5.zip");
        let mut predictor = Predictor::new("EURUSD", 5, bundle);

        let history: Vec<Bar> = (0..5).map(|i| bar(i, 1.1000)).collect();
        predictor.warmup(history).unwrap();

        let signal = predictor.on_bar(bar(5, 1.1010)).unwrap();
        assert!(signal.is_some(), "buffer should already be ready after warmup");
    }
}
