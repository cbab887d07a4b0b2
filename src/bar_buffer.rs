// =============================================================================
// Bar Buffer — bounded FIFO of closed bars, exclusively owned per symbol
// =============================================================================
//
// Not shared: the predictor owns exactly one buffer per symbol, so no
// synchronization is needed here (contrast the teacher's `CandleBuffer`,
// which is a shared `RwLock<HashMap<...>>` because multiple streams write
// into it concurrently).
// =============================================================================

use std::collections::VecDeque;

use crate::error::BarError;
use crate::types::Bar;

/// Columnar snapshot of the buffer's bars, ordered oldest to newest.
#[derive(Debug, Clone, Default)]
pub struct BarSnapshot {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub epoch_seconds: Vec<i64>,
}

/// Bounded FIFO of closed bars. `capacity` must be at least the longest
/// indicator lookback the feature engine uses.
pub struct BarBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a newly closed bar. Rejected if its timestamp does not strictly
    /// follow the last bar already in the buffer.
    pub fn push(&mut self, bar: Bar) -> Result<(), BarError> {
        if let Some(last) = self.bars.back() {
            if bar.epoch_seconds <= last.epoch_seconds {
                return Err(BarError::OutOfOrderBar {
                    incoming: bar.epoch_seconds,
                    last: last.epoch_seconds,
                });
            }
        }

        self.bars.push_back(bar);
        if self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Whether the buffer holds a full window of `capacity` bars.
    pub fn ready(&self) -> bool {
        self.bars.len() >= self.capacity
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Columnar view of the current contents, oldest first.
    pub fn snapshot(&self) -> BarSnapshot {
        let mut snap = BarSnapshot {
            open: Vec::with_capacity(self.bars.len()),
            high: Vec::with_capacity(self.bars.len()),
            low: Vec::with_capacity(self.bars.len()),
            close: Vec::with_capacity(self.bars.len()),
            volume: Vec::with_capacity(self.bars.len()),
            epoch_seconds: Vec::with_capacity(self.bars.len()),
        };
        for bar in &self.bars {
            snap.open.push(bar.open);
            snap.high.push(bar.high);
            snap.low.push(bar.low);
            snap.close.push(bar.close);
            snap.volume.push(bar.volume);
            snap.epoch_seconds.push(bar.epoch_seconds);
        }
        snap
    }
}
