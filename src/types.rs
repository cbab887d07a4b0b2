// =============================================================================
// Shared types — Action space, Bar, Signal, operational modes
// =============================================================================
//
// The source represents actions as dynamically-typed strings ("LONG_WEAK",
// "SHORT_STRONG", ...). Here the action space is a closed sum type with
// compile-time-checked projections to `direction` and `intensity` (Design
// Note: replace dynamic typing with a closed enum plus projections).
// =============================================================================

use serde::{Deserialize, Serialize};

/// The policy's seven discrete actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Wait,
    LongWeak,
    LongModerate,
    LongStrong,
    ShortWeak,
    ShortModerate,
    ShortStrong,
}

impl Action {
    /// Direction projection: -1 short, 0 flat/wait, +1 long.
    pub fn direction(self) -> i8 {
        match self {
            Action::Wait => 0,
            Action::LongWeak | Action::LongModerate | Action::LongStrong => 1,
            Action::ShortWeak | Action::ShortModerate | Action::ShortStrong => -1,
        }
    }

    /// Intensity projection: 0 for Wait, 1..3 otherwise.
    pub fn intensity(self) -> u8 {
        match self {
            Action::Wait => 0,
            Action::LongWeak | Action::ShortWeak => 1,
            Action::LongModerate | Action::ShortModerate => 2,
            Action::LongStrong | Action::ShortStrong => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WAIT" => Some(Action::Wait),
            "LONG_WEAK" => Some(Action::LongWeak),
            "LONG_MODERATE" => Some(Action::LongModerate),
            "LONG_STRONG" => Some(Action::LongStrong),
            "SHORT_WEAK" => Some(Action::ShortWeak),
            "SHORT_MODERATE" => Some(Action::ShortModerate),
            "SHORT_STRONG" => Some(Action::ShortStrong),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Wait => "WAIT",
            Action::LongWeak => "LONG_WEAK",
            Action::LongModerate => "LONG_MODERATE",
            Action::LongStrong => "LONG_STRONG",
            Action::ShortWeak => "SHORT_WEAK",
            Action::ShortModerate => "SHORT_MODERATE",
            Action::ShortStrong => "SHORT_STRONG",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An immutable closed OHLCV candle, aligned to its timeframe's grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub epoch_seconds: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The predictor's per-closed-bar, per-symbol emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: Action,
    pub direction: i8,
    pub intensity: u8,
    pub hmm_state: usize,
    pub virtual_pnl: f64,
    pub emitted_at: i64,
    pub close_price: f64,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        action: Action,
        hmm_state: usize,
        virtual_pnl: f64,
        emitted_at: i64,
        close_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            direction: action.direction(),
            intensity: action.intensity(),
            hmm_state,
            virtual_pnl,
            emitted_at,
            close_price,
        }
    }
}

/// Whether the engine is actively trading, paused, or killed. Boots Paused
/// (or under `--dry-run`) and must be explicitly promoted to Live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against a demo or live broker environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Process-wide session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_intensity_projection_consistency() {
        for action in [
            Action::Wait,
            Action::LongWeak,
            Action::LongModerate,
            Action::LongStrong,
            Action::ShortWeak,
            Action::ShortModerate,
            Action::ShortStrong,
        ] {
            let d = action.direction();
            let i = action.intensity();
            assert_eq!(d == 0, i == 0, "direction==0 must imply intensity==0 for {action}");
        }
    }

    #[test]
    fn name_roundtrip() {
        for action in [Action::LongStrong, Action::ShortWeak, Action::Wait] {
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
    }
}
