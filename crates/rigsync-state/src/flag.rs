//! Edge-triggered boolean flags.

use std::time::{Duration, SystemTime};

/// A boolean that remembers whether it changed since it was last observed.
///
/// Reading the value with [`get`](Self::get) never consumes the change;
/// only [`take_change`](Self::take_change) does. Flags live inside the
/// node's coarse state lock, so plain fields are enough.
#[derive(Debug, Clone, Default)]
pub struct EdgeFlag {
    value: bool,
    changed: bool,
    changed_at: Option<SystemTime>,
}

impl EdgeFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Store `value`. Returns whether it differed from the previous value.
    pub fn set(&mut self, value: bool) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.changed = true;
        self.changed_at = Some(SystemTime::now());
        true
    }

    pub fn get(&self) -> bool {
        self.value
    }

    /// Read and clear the pending-change bit.
    pub fn take_change(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Wall-clock time of the last value change.
    pub fn changed_at(&self) -> Option<SystemTime> {
        self.changed_at
    }

    /// Whether the last value change happened less than `window` ago.
    pub fn changed_within(&self, window: Duration) -> bool {
        self.changed_at
            .and_then(|at| at.elapsed().ok())
            .is_some_and(|age| age < window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_is_reported_exactly_once() {
        let mut flag = EdgeFlag::default();
        assert!(flag.set(true));
        assert!(flag.take_change());
        assert!(!flag.take_change());
    }

    #[test]
    fn unchanged_sets_do_not_mark_a_change() {
        let mut flag = EdgeFlag::new(true);
        for _ in 0..5 {
            assert!(!flag.set(true));
        }
        assert!(!flag.take_change());
        assert!(flag.changed_at().is_none());
    }

    #[test]
    fn get_does_not_consume_change() {
        let mut flag = EdgeFlag::default();
        flag.set(true);
        assert!(flag.get());
        assert!(flag.get());
        assert!(flag.take_change());
    }

    #[test]
    fn sequence_of_sets_counts_value_changes() {
        let mut flag = EdgeFlag::default();
        let values = [true, true, false, false, false, true, false, false];
        let mut observed = 0;
        let mut expected = 0;
        let mut previous = false;
        for v in values {
            if v != previous {
                expected += 1;
            }
            previous = v;
            flag.set(v);
            if flag.take_change() {
                observed += 1;
            }
        }
        assert_eq!(observed, expected);
    }

    #[test]
    fn flip_back_within_one_cycle_still_pending() {
        // true -> false -> true between two observations leaves the value
        // unchanged but the transition must not be lost.
        let mut flag = EdgeFlag::new(true);
        flag.set(false);
        flag.set(true);
        assert!(flag.get());
        assert!(flag.take_change());
    }

    #[test]
    fn records_change_time() {
        let mut flag = EdgeFlag::default();
        flag.set(true);
        assert!(flag.changed_at().is_some());
        assert!(flag.changed_within(Duration::from_secs(60)));
    }
}
