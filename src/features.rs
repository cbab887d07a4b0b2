// =============================================================================
// Feature Engine — pure, stateless functions over a right-aligned bar window
// =============================================================================
//
// Output here must match the training environment to within 1e-6 per
// element; this is the single most critical invariant in the system (any
// drift invalidates deployed models), so every function is a pure
// transform of its inputs with no hidden state, mirrored closely against
// the arithmetic the training environment uses.
// =============================================================================

use crate::bar_buffer::BarSnapshot;

/// The three HMM input features: momentum, consistency, range position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmFeatures {
    pub momentum: f64,
    pub consistency: f64,
    pub range_position: f64,
}

/// Periods used to compute HMM features.
#[derive(Debug, Clone, Copy)]
pub struct HmmPeriods {
    pub momentum_period: usize,
    pub consistency_period: usize,
    pub range_period: usize,
}

/// Periods used to compute policy market features.
#[derive(Debug, Clone, Copy)]
pub struct PolicyPeriods {
    pub roc_period: usize,
    pub atr_period: usize,
    pub ema_period: usize,
    pub range_period: usize,
    pub volume_ma_period: usize,
}

fn nan_to_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Rolling sum of log-returns over `period` bars, rescaled x100, clipped
/// to [-5, 5]. `closes` is right-aligned (last element is the current bar).
pub fn momentum(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 0.0;
    }
    let window = &closes[closes.len() - period - 1..];
    let mut sum = 0.0;
    for i in 1..window.len() {
        let prev = window[i - 1];
        let cur = window[i];
        if prev > 0.0 && cur > 0.0 {
            sum += (cur / prev).ln();
        }
    }
    nan_to_zero((sum * 100.0).clamp(-5.0, 5.0))
}

/// `max(up_count, down_count) / period * 2 - 1`, signed by `sign(up - down)`.
pub fn consistency(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 0.0;
    }
    let window = &closes[closes.len() - period - 1..];
    let mut up = 0u32;
    let mut down = 0u32;
    for i in 1..window.len() {
        if window[i] > window[i - 1] {
            up += 1;
        } else if window[i] < window[i - 1] {
            down += 1;
        }
    }
    let magnitude = (up.max(down) as f64 / period as f64) * 2.0 - 1.0;
    let sign = match up.cmp(&down) {
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
    };
    nan_to_zero(magnitude * sign)
}

/// `(close - lowest_low) / (highest_high - lowest_low) * 2 - 1` over `period`.
pub fn range_position(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period || highs.len() < period || lows.len() < period {
        return 0.0;
    }
    let h = &highs[highs.len() - period..];
    let l = &lows[lows.len() - period..];
    let close = *closes.last().unwrap();

    let highest = h.iter().cloned().fold(f64::MIN, f64::max);
    let lowest = l.iter().cloned().fold(f64::MAX, f64::min);
    let span = highest - lowest;
    if span <= 0.0 {
        return 0.0;
    }
    nan_to_zero(((close - lowest) / span) * 2.0 - 1.0)
}

/// Compute the three HMM features from a right-aligned bar snapshot.
pub fn hmm_features(snapshot: &BarSnapshot, periods: HmmPeriods) -> HmmFeatures {
    HmmFeatures {
        momentum: momentum(&snapshot.close, periods.momentum_period),
        consistency: consistency(&snapshot.close, periods.consistency_period),
        range_position: range_position(&snapshot.high, &snapshot.low, &snapshot.close, periods.range_period),
    }
}

/// True Range rolling mean (simple, not Wilder's) over `period` bars.
fn atr(snapshot: &BarSnapshot, period: usize) -> f64 {
    let n = snapshot.close.len();
    if period == 0 || n < period + 1 {
        return 0.0;
    }
    let start = n - period;
    let mut sum = 0.0;
    for i in start..n {
        let high = snapshot.high[i];
        let low = snapshot.low[i];
        let prev_close = snapshot.close[i - 1];
        let tr = (high - low).max((high - prev_close).abs()).max((low - prev_close).abs());
        sum += tr;
    }
    sum / period as f64
}

fn ema(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    let window = &values[values.len() - period..];
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = window[0];
    for &v in &window[1..] {
        value = alpha * v + (1.0 - alpha) * value;
    }
    value
}

fn volume_ma(volumes: &[f64], period: usize) -> f64 {
    if period == 0 || volumes.len() < period {
        return 0.0;
    }
    let window = &volumes[volumes.len() - period..];
    window.iter().sum::<f64>() / period as f64
}

/// Build the fixed-length policy feature vector: 6 market features, a
/// one-hot encoding of the current HMM state over `n_states`, and 3
/// position features (direction, scaled intensity, scaled floating PnL).
pub fn policy_features(
    snapshot: &BarSnapshot,
    periods: PolicyPeriods,
    hour_of_day: u32,
    hmm_state: usize,
    n_states: usize,
    position_direction: i8,
    intensity: u8,
    floating_pnl: f64,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(6 + n_states + 3);
    let n = snapshot.close.len();

    let roc = if periods.roc_period > 0 && n > periods.roc_period {
        let past = snapshot.close[n - 1 - periods.roc_period];
        let cur = snapshot.close[n - 1];
        if past != 0.0 {
            nan_to_zero(((cur - past) / past * 20.0).tanh())
        } else {
            0.0
        }
    } else {
        0.0
    };
    out.push(roc);

    let cur_close = *snapshot.close.last().unwrap_or(&0.0);
    let atr_value = atr(snapshot, periods.atr_period);
    let atr_feature = if cur_close != 0.0 {
        nan_to_zero((atr_value / cur_close * 50.0).tanh())
    } else {
        0.0
    };
    out.push(atr_feature);

    let ema_value = ema(&snapshot.close, periods.ema_period);
    let ema_feature = if ema_value != 0.0 {
        nan_to_zero(((cur_close - ema_value) / ema_value * 20.0).tanh())
    } else {
        0.0
    };
    out.push(ema_feature);

    out.push(range_position(&snapshot.high, &snapshot.low, &snapshot.close, periods.range_period));

    let vol_ma = volume_ma(&snapshot.volume, periods.volume_ma_period);
    let cur_volume = *snapshot.volume.last().unwrap_or(&0.0);
    let volume_feature = if vol_ma != 0.0 {
        nan_to_zero(((cur_volume / vol_ma - 1.0) * 2.0).tanh())
    } else {
        0.0
    };
    out.push(volume_feature);

    out.push((2.0 * std::f64::consts::PI * hour_of_day as f64 / 24.0).sin());

    for state in 0..n_states {
        out.push(if state == hmm_state { 1.0 } else { 0.0 });
    }

    out.push(position_direction as f64);
    out.push(intensity as f64 * 10.0);
    out.push(nan_to_zero((floating_pnl / 100.0).tanh()));

    out
}
