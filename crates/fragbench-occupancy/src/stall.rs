//! Non-progress detection for the convergence loop.

use std::num::NonZeroU32;

/// Counts consecutive identical occupancy readings.
///
/// Any change resets the count. The tracker trips once the count reaches
/// the threshold.
#[derive(Debug, Clone)]
pub struct StallTracker {
    threshold: u32,
    repeats: u32,
    last: f64,
}

impl StallTracker {
    pub fn new(threshold: NonZeroU32, initial: f64) -> Self {
        Self {
            threshold: threshold.get(),
            repeats: 0,
            last: initial,
        }
    }

    /// Record a reading taken after a batch. Returns `true` when stalled.
    pub fn observe(&mut self, reading: f64) -> bool {
        if reading == self.last {
            self.repeats += 1;
        } else {
            self.repeats = 0;
        }
        self.last = reading;
        self.repeats >= self.threshold
    }

    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    pub fn last(&self) -> f64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn trips_on_the_threshold_repeat() {
        let mut tracker = StallTracker::new(threshold(10), 42.0);
        for _ in 0..9 {
            assert!(!tracker.observe(42.0));
        }
        assert!(tracker.observe(42.0));
        assert_eq!(tracker.repeats(), 10);
    }

    #[test]
    fn any_change_resets() {
        let mut tracker = StallTracker::new(threshold(3), 10.0);
        assert!(!tracker.observe(10.0));
        assert!(!tracker.observe(10.0));
        assert!(!tracker.observe(10.5));
        assert_eq!(tracker.repeats(), 0);
        assert!(!tracker.observe(10.5));
        assert!(!tracker.observe(10.5));
        assert!(tracker.observe(10.5));
    }

    #[test]
    fn decreasing_readings_count_as_progress() {
        let mut tracker = StallTracker::new(threshold(2), 50.0);
        assert!(!tracker.observe(49.0));
        assert!(!tracker.observe(48.0));
        assert_eq!(tracker.last(), 48.0);
    }

    #[test]
    fn threshold_of_one_needs_an_unchanged_reading() {
        let mut tracker = StallTracker::new(NonZeroU32::MIN, 10.0);
        assert!(!tracker.observe(12.0));
        assert!(!tracker.observe(14.0));
        assert!(tracker.observe(14.0));
    }
}
