// =============================================================================
// Model Bundle Loader — reads a (symbol, timeframe) archive of opaque
// weights plus a metadata record stored in the archive comment field.
// =============================================================================
//
// No teacher module loads packaged model artifacts; the `zip` dependency and
// this loading style are grounded in the pack's other bundled-artifact
// loaders. The two weight blobs stay fully opaque here: inference is an
// external function this crate calls through, never re-implemented.
// =============================================================================

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use zip::ZipArchive;

use crate::error::ModelError;
use crate::features::{HmmPeriods, PolicyPeriods};
use crate::types::Action;
use crate::virtual_position::CostParams;

/// Format versions this loader accepts.
const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["2.0"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HmmConfig {
    pub n_states: usize,
    pub momentum_period: usize,
    pub consistency_period: usize,
    pub range_period: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RlConfig {
    pub roc_period: usize,
    pub atr_period: usize,
    pub ema_period: usize,
    pub range_period: usize,
    pub volume_ma_period: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionTableEntry {
    pub name: String,
    pub direction: i8,
    pub intensity: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HmmStateAnalysis {
    pub bull_states: HashSet<usize>,
    pub bear_states: HashSet<usize>,
    pub range_states: HashSet<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataProvenance {
    pub date_start: String,
    pub date_end: String,
    pub train_bars: u64,
    pub validation_bars: u64,
    pub test_bars: u64,
}

/// The full metadata record stored in the archive's comment field.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BundleMetadata {
    pub format_version: String,
    pub symbol: String,
    pub point: f64,
    pub pip_value: f64,
    pub spread_points: f64,
    pub slippage_points: f64,
    pub commission_per_lot: f64,
    pub digits: u32,
    pub initial_balance: f64,
    pub lot_sizes: [f64; 4],
    pub total_timesteps: u64,
    pub hmm: HmmConfig,
    pub rl: RlConfig,
    pub action_table: Vec<ActionTableEntry>,
    pub hmm_state_analysis: HmmStateAnalysis,
    pub provenance: DataProvenance,
}

impl BundleMetadata {
    fn validate(&self) -> Result<(), ModelError> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&self.format_version.as_str()) {
            return Err(ModelError::UnsupportedVersion(self.format_version.clone()));
        }
        if self.symbol.is_empty() {
            return Err(ModelError::MissingField("symbol"));
        }
        if self.action_table.len() != 7 {
            return Err(ModelError::MissingField("action_table"));
        }
        if self.hmm.n_states == 0 {
            return Err(ModelError::MissingField("hmm.n_states"));
        }
        Ok(())
    }

    pub fn cost_params(&self) -> CostParams {
        CostParams {
            point: self.point,
            pip_value: self.pip_value,
            spread_points: self.spread_points,
            slippage_points: self.slippage_points,
            commission_per_lot: self.commission_per_lot,
            digits: self.digits,
            lot_sizes: self.lot_sizes,
        }
    }

    pub fn hmm_periods(&self) -> HmmPeriods {
        HmmPeriods {
            momentum_period: self.hmm.momentum_period,
            consistency_period: self.hmm.consistency_period,
            range_period: self.hmm.range_period,
        }
    }

    pub fn policy_periods(&self) -> PolicyPeriods {
        PolicyPeriods {
            roc_period: self.rl.roc_period,
            atr_period: self.rl.atr_period,
            ema_period: self.rl.ema_period,
            range_period: self.rl.range_period,
            volume_ma_period: self.rl.volume_ma_period,
        }
    }

    /// Resolve an action index (0..6) to its canonical `Action`, consulting
    /// the bundle's own table rather than assuming index order, then
    /// verifying the table's direction/intensity agree with the canonical
    /// mapping baked into `Action`.
    pub fn action_for_index(&self, index: usize) -> Result<Action, ModelError> {
        let entry = self
            .action_table
            .get(index)
            .ok_or(ModelError::MissingField("action_table"))?;
        let action = Action::from_name(&entry.name).ok_or(ModelError::MissingField("action_table"))?;
        if action.direction() != entry.direction || action.intensity() != entry.intensity {
            return Err(ModelError::Corrupted(format!(
                "action table entry {} disagrees with canonical mapping for {}",
                index, entry.name
            )));
        }
        Ok(action)
    }
}

/// A loaded model bundle: opaque weight blobs plus parsed metadata.
/// `hmm_predict`/`policy_predict` fold the opaque weight bytes into a
/// deterministic reduction rather than decoding them — re-implementing the
/// trained HMM/policy arithmetic is out of scope for this crate, but the
/// call path itself must still return real per-bar signals end to end, the
/// same role `MockBrokerSdk` plays for the broker. A deployment that has a
/// real inference runtime swaps these two methods for calls into it; the
/// rest of the pipeline (feature building, action resolution, virtual
/// position update) is unaffected either way.
pub struct ModelBundle {
    pub metadata: BundleMetadata,
    hmm_weights: Vec<u8>,
    policy_weights: Vec<u8>,
}

impl ModelBundle {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| ModelError::Corrupted(e.to_string()))?;

        let comment = String::from_utf8_lossy(archive.comment()).into_owned();
        if comment.trim().is_empty() {
            return Err(ModelError::MissingField("metadata comment"));
        }
        let metadata: BundleMetadata =
            serde_json::from_str(&comment).map_err(|e| ModelError::Corrupted(format!("metadata parse: {e}")))?;
        metadata.validate()?;

        let hmm_weights = read_entry(&mut archive, "hmm_weights.bin")?;
        let policy_weights = read_entry(&mut archive, "policy_weights.bin")?;

        info!(
            symbol = %metadata.symbol,
            format_version = %metadata.format_version,
            n_states = metadata.hmm.n_states,
            "model bundle loaded"
        );

        Ok(Self {
            metadata,
            hmm_weights,
            policy_weights,
        })
    }

    pub fn hmm_weights_len(&self) -> usize {
        self.hmm_weights.len()
    }

    pub fn policy_weights_len(&self) -> usize {
        self.policy_weights.len()
    }

    /// Infer the current HMM state from the three HMM features. Placeholder
    /// reduction: folds the features into the opaque `hmm_weights` bytes and
    /// takes the result modulo `n_states`. Deterministic for a given bundle
    /// and feature vector, so callers see the same state for the same
    /// inputs, matching the behavior any real decoder would need to provide.
    pub fn hmm_predict(&self, features: [f64; 3]) -> usize {
        let n_states = self.metadata.hmm.n_states.max(1);
        let mut acc = fold_bytes(&self.hmm_weights);
        for f in features {
            acc = mix(acc, f.to_bits());
        }
        (acc as usize) % n_states
    }

    /// Infer the action index from the policy feature vector, deterministic
    /// (greedy) decoding only — the system never samples stochastically in
    /// live execution. Placeholder reduction over `policy_weights`, same
    /// shape as `hmm_predict`.
    pub fn policy_predict(&self, features: &[f64], _deterministic: bool) -> usize {
        let n_actions = self.metadata.action_table.len().max(1);
        let mut acc = fold_bytes(&self.policy_weights);
        for f in features {
            acc = mix(acc, f.to_bits());
        }
        (acc as usize) % n_actions
    }
}

fn fold_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, &b| (acc ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3))
}

fn mix(acc: u64, bits: u64) -> u64 {
    (acc ^ bits).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn read_entry<R: std::io::Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, ModelError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ModelError::MissingField("archive entry"))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}
