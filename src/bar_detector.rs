// =============================================================================
// Bar Detector — aggregates a tick stream into closed bars on a fixed grid
// =============================================================================
//
// Redesigned from the teacher's `market_data::candle_buffer`, which consumes
// already-aggregated exchange klines over a websocket. Here there is no
// upstream kline feed: the broker bridge only delivers raw ticks, so this
// module performs the time-bucket aggregation itself.
// =============================================================================

use crate::types::Bar;

#[derive(Debug, Clone, Copy)]
struct InProgress {
    bar_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Aggregates `(epoch_seconds, price)` ticks for one symbol into bars
/// aligned to a fixed `period` grid (seconds). Owned exclusively by the
/// predictor's per-symbol task.
pub struct BarDetector {
    period: i64,
    current: Option<InProgress>,
}

impl BarDetector {
    pub fn new(period_seconds: i64) -> Self {
        assert!(period_seconds > 0, "bar period must be positive");
        Self {
            period: period_seconds,
            current: None,
        }
    }

    /// Feed one tick. Returns `Some(bar)` if this tick closed the
    /// previously in-progress bar (the closed bar is returned; the new
    /// in-progress bar is seeded from this tick). Returns `None` on the
    /// very first tick (state initializes without emitting) and on ticks
    /// that land within the current bar.
    pub fn on_tick(&mut self, epoch_seconds: i64, price: f64, volume: f64) -> Option<Bar> {
        let bar_start = (epoch_seconds / self.period) * self.period;

        match self.current {
            None => {
                self.current = Some(InProgress {
                    bar_start,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                });
                None
            }
            Some(ref mut acc) if bar_start > acc.bar_start => {
                let closed = Bar {
                    epoch_seconds: acc.bar_start,
                    open: acc.open,
                    high: acc.high,
                    low: acc.low,
                    close: acc.close,
                    volume: acc.volume,
                };
                *acc = InProgress {
                    bar_start,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                };
                Some(closed)
            }
            Some(ref mut acc) => {
                acc.high = acc.high.max(price);
                acc.low = acc.low.min(price);
                acc.close = price;
                acc.volume += volume;
                None
            }
        }
    }

    /// The start time of the bar currently accumulating, if any.
    pub fn current_bar_start(&self) -> Option<i64> {
        self.current.map(|c| c.bar_start)
    }
}
