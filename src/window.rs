//! Sliding window of failure timestamps.

use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Failure events inside a trailing time window.
///
/// Events are kept sorted by time, so stale ones always sit at the front.
/// The window is not synchronized; the breaker holds it under its own lock.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    events: SmallVec<[Instant; 16]>,
    width: Duration,
}

impl SlidingWindow {
    pub(crate) fn new(width: Duration) -> Self {
        Self {
            events: SmallVec::new(),
            width,
        }
    }

    /// Records a failure at `now` and returns the number of failures in the window.
    pub(crate) fn record(&mut self, now: Instant) -> usize {
        self.purge(now);
        let at = self.events.partition_point(|event| *event <= now);
        self.events.insert(at, now);
        self.events.len()
    }

    /// Number of failures that are not older than `now - width`, without purging.
    pub(crate) fn live(&self, now: Instant) -> usize {
        match now.checked_sub(self.width) {
            Some(cutoff) => self.events.iter().filter(|at| **at >= cutoff).count(),
            None => self.events.len(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    fn purge(&mut self, now: Instant) {
        // Nothing can be stale before a full window has passed since the clock's epoch.
        let Some(cutoff) = now.checked_sub(self.width) else {
            return;
        };

        let stale = self.events.iter().take_while(|at| **at < cutoff).count();
        if stale > 0 {
            self.events.drain(..stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn aged_out_failures_are_not_counted() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(10));

        for _ in 0..4 {
            window.record(start);
        }
        assert_eq!(window.live(start + Duration::from_secs(10)), 4);

        let count = window.record(start + Duration::from_secs(11));
        assert_eq!(count, 1);
    }

    #[test]
    fn burst_across_a_boundary_is_counted_in_full() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(10));

        window.record(start + Duration::from_secs(8));
        window.record(start + Duration::from_secs(9));
        window.record(start + Duration::from_secs(10));
        assert_eq!(window.record(start + Duration::from_secs(11)), 4);
    }

    #[test]
    fn late_timestamp_does_not_shield_stale_ones() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(10));

        window.record(start + Duration::from_secs(5));
        window.record(start);
        assert_eq!(window.record(start + Duration::from_secs(12)), 2);
        assert_eq!(window.live(start + Duration::from_secs(12)), 2);
    }

    #[test]
    fn clear_drops_everything() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(1));
        window.record(start);
        window.clear();
        assert_eq!(window.live(start), 0);
    }

    proptest! {
        #[test]
        fn count_matches_events_inside_window(
            mut offsets in proptest::collection::vec(0u64..60_000, 1..64),
            width_ms in 1u64..20_000,
        ) {
            offsets.sort_unstable();
            let start = Instant::now();
            let width = Duration::from_millis(width_ms);
            let mut window = SlidingWindow::new(width);

            for offset in &offsets {
                window.record(start + Duration::from_millis(*offset));
            }

            let last = *offsets.last().unwrap();
            let now = start + Duration::from_millis(last);
            let expected = offsets
                .iter()
                .filter(|o| last - **o <= width_ms)
                .count();
            prop_assert_eq!(window.live(now), expected);
        }
    }
}
