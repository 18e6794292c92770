use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lead time before the next minute boundary that opens a new window.
const WINDOW_LEAD_MILLIS: i64 = 10_000;
const WINDOW_MILLIS: i64 = 60_000;
const DELAY_STEP_MILLIS: u64 = 100;
const DELAY_SPREAD_MILLIS: u64 = 10_000;

/// Rotating delay hint that spreads agent aggregate uploads across ten
/// seconds after each minute boundary.
///
/// Every call hands out the next 100ms slot; the counter restarts whenever a
/// call lands within ten seconds of (or past) the current window end. Two
/// callers racing across a boundary may both reset.
#[derive(Debug, Default)]
pub struct DelayState {
    window_end_millis: AtomicI64,
    next_delay: AtomicU64,
}

impl DelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delay, in `[0, 10_000)` and a multiple of 100, that the
    /// agent should wait before sending its next aggregates.
    pub fn next_delay_millis(&self, now_millis: i64) -> u32 {
        let lookahead = now_millis + WINDOW_LEAD_MILLIS;
        if lookahead > self.window_end_millis.load(Ordering::Acquire) {
            self.next_delay.store(0, Ordering::Release);
            let window_end = (lookahead + WINDOW_MILLIS - 1).div_euclid(WINDOW_MILLIS) * WINDOW_MILLIS;
            self.window_end_millis.store(window_end, Ordering::Release);
        }

        let previous = self
            .next_delay
            .fetch_add(DELAY_STEP_MILLIS, Ordering::AcqRel);
        (previous % DELAY_SPREAD_MILLIS) as u32
    }

    /// Current window end, for diagnostics.
    pub(crate) fn window_end_millis(&self) -> i64 {
        self.window_end_millis.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_wraps_within_window() {
        let state = DelayState::new();
        let now = 1_700_000_000_000 - 1_700_000_000_000 % 60_000 + 5_000;

        let delays: Vec<u32> = (0..150).map(|_| state.next_delay_millis(now)).collect();

        for (i, delay) in delays.iter().enumerate().take(100) {
            assert_eq!(*delay, (i as u32) * 100);
        }
        for (i, delay) in delays.iter().enumerate().skip(100) {
            assert_eq!(*delay, ((i - 100) as u32) * 100);
        }
    }

    #[test]
    fn test_window_end_rounds_up_to_minute() {
        let state = DelayState::new();
        state.next_delay_millis(125_000);
        // lookahead 135_000 rounds up to 180_000
        assert_eq!(state.window_end_millis(), 180_000);

        let state = DelayState::new();
        state.next_delay_millis(110_000);
        // lookahead exactly on a boundary stays there
        assert_eq!(state.window_end_millis(), 120_000);
    }

    #[test]
    fn test_crossing_boundary_resets() {
        let state = DelayState::new();
        assert_eq!(state.next_delay_millis(5_000), 0);
        assert_eq!(state.next_delay_millis(20_000), 100);
        assert_eq!(state.next_delay_millis(49_999), 200);
        assert_eq!(state.window_end_millis(), 60_000);

        // 50_001 + 10_000 passes the window end at 60_000
        assert_eq!(state.next_delay_millis(50_001), 0);
        assert_eq!(state.window_end_millis(), 120_000);
        assert_eq!(state.next_delay_millis(50_002), 100);
    }

    #[test]
    fn test_delays_are_bounded() {
        let state = DelayState::new();
        for i in 0..1_000 {
            let delay = state.next_delay_millis(i * 37);
            assert!(delay < 10_000);
            assert_eq!(delay % 100, 0);
        }
    }
}
