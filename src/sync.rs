// =============================================================================
// Sync State Machine — reconciles the broker's real position with the
// model's signal direction
// =============================================================================
//
// Redesigned from the teacher's `reconcile::reconcile_once`, which only
// detects and warns about drift (its explicit safety policy: never
// auto-cancels/closes). Here reconciliation must actually drive action —
// opening and closing are decisions this state machine makes, not merely
// reports — but the "missed-entry" latch means it never opens a position
// to chase a move already in progress.
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Noop,
    Open,
    Close,
    WaitSync,
}

/// Per-symbol sync state. Owned exclusively by the Executor; not shared.
///
/// `last_flat_direction` is the last signal direction reconciled while the
/// broker was flat — `None` means "never observed a signal while flat since
/// the last real position closed", which is the only condition under which
/// a nonzero signal must latch rather than open. Once a direction has been
/// reconciled (even 0, from a resolved latch or a plain WAIT), any later
/// differing direction is itself the edge and acts immediately; no second
/// latch/edge cycle is required. A real position (`Some`) always resets
/// this to `None`, so the next time the broker goes flat — whether by our
/// own close or an external one — the missed-entry rule applies fresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncState {
    waiting_sync: bool,
    last_flat_direction: Option<i8>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting_sync(&self) -> bool {
        self.waiting_sync
    }

    /// Evaluate one signal against the broker's real position and update
    /// internal latch state. Returns the decision and whether this call
    /// constitutes the "should_open" edge (a fresh open is required).
    pub fn evaluate(&mut self, real_direction: Option<i8>, signal_direction: i8) -> (Decision, bool) {
        match real_direction {
            None => match self.last_flat_direction {
                None => {
                    self.last_flat_direction = Some(signal_direction);
                    if signal_direction == 0 {
                        (Decision::Noop, false)
                    } else {
                        self.waiting_sync = true;
                        (Decision::WaitSync, false)
                    }
                }
                Some(last) if signal_direction == last => {
                    if self.waiting_sync {
                        (Decision::WaitSync, false)
                    } else {
                        (Decision::Noop, false)
                    }
                }
                Some(_) => {
                    self.waiting_sync = false;
                    self.last_flat_direction = Some(signal_direction);
                    if signal_direction != 0 {
                        (Decision::Open, true)
                    } else {
                        (Decision::Noop, false)
                    }
                }
            },
            Some(real) => {
                self.waiting_sync = false;
                self.last_flat_direction = None;
                if signal_direction == real {
                    (Decision::Noop, false)
                } else {
                    // Covers both signal == 0 and signal == opposite.
                    (Decision::Close, false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_real_flat_signal_is_noop() {
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(None, 0), (Decision::Noop, false));
    }

    #[test]
    fn flat_real_nonzero_signal_latches_wait_sync() {
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(None, 1), (Decision::WaitSync, false));
        assert!(s.is_waiting_sync());
    }

    #[test]
    fn wait_sync_holds_while_signal_unchanged() {
        let mut s = SyncState::new();
        s.evaluate(None, 1);
        assert_eq!(s.evaluate(None, 1), (Decision::WaitSync, false));
        assert!(s.is_waiting_sync());
    }

    #[test]
    fn wait_sync_clears_and_opens_on_direction_edge() {
        let mut s = SyncState::new();
        s.evaluate(None, 1);
        let (decision, should_open) = s.evaluate(None, -1);
        assert_eq!(decision, Decision::Open);
        assert!(should_open);
        assert!(!s.is_waiting_sync());
    }

    #[test]
    fn wait_sync_clears_to_noop_on_return_to_flat_signal() {
        let mut s = SyncState::new();
        s.evaluate(None, 1);
        let (decision, should_open) = s.evaluate(None, 0);
        assert_eq!(decision, Decision::Noop);
        assert!(!should_open);
        assert!(!s.is_waiting_sync());
    }

    #[test]
    fn real_matches_signal_is_noop() {
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(Some(1), 1), (Decision::Noop, false));
    }

    #[test]
    fn real_position_signal_flat_closes() {
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(Some(1), 0), (Decision::Close, false));
    }

    #[test]
    fn real_position_signal_opposite_closes() {
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(Some(1), -1), (Decision::Close, false));
    }

    #[test]
    fn edge_to_wait_opens_immediately_on_next_nonzero_signal() {
        // Bar 1-2: latch LONG. Bar 3: WAIT clears the latch to flat. Bar 4:
        // a differing nonzero signal is itself the edge and must open
        // without re-latching first.
        let mut s = SyncState::new();
        assert_eq!(s.evaluate(None, 1), (Decision::WaitSync, false));
        assert_eq!(s.evaluate(None, 1), (Decision::WaitSync, false));
        assert_eq!(s.evaluate(None, 0), (Decision::Noop, false));
        assert!(!s.is_waiting_sync());
        let (decision, should_open) = s.evaluate(None, -1);
        assert_eq!(decision, Decision::Open);
        assert!(should_open);
    }

    #[test]
    fn externally_closed_position_falls_into_wait_sync_not_reopen() {
        let mut s = SyncState::new();
        // Broker held a long, got externally closed (now flat), model still
        // says "hold long" -- must wait for an edge, not re-enter blindly.
        assert_eq!(s.evaluate(Some(1), 1), (Decision::Noop, false));
        assert_eq!(s.evaluate(None, 1), (Decision::WaitSync, false));
        assert!(s.is_waiting_sync());
    }
}
