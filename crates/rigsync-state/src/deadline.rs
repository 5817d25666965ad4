//! Monotonic deadlines for bounded polling loops.
//!
//! Every "keep checking until X holds or N seconds pass" wait in rigsync is
//! a `Deadline` plus a short sleep. The clock is `tokio::time::Instant` so
//! paused-time tests advance deadlines deterministically.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// A deadline that expires a fixed duration after it was last armed.
#[derive(Debug, Clone)]
pub struct Deadline {
    max: Duration,
    end: Instant,
    label: Option<String>,
    reported: bool,
}

impl Deadline {
    /// Arm a deadline expiring `max` from now.
    pub fn new(max: Duration) -> Self {
        Self {
            max,
            end: Instant::now() + max,
            label: None,
            reported: false,
        }
    }

    /// Arm a deadline that logs a one-time notice when it expires.
    pub fn labeled(max: Duration, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(max)
        }
    }

    /// Re-arm from now with the last duration.
    pub fn reset(&mut self) {
        self.end = Instant::now() + self.max;
        self.reported = false;
    }

    /// Re-arm from now with a new duration.
    pub fn reset_to(&mut self, max: Duration) {
        self.max = max;
        self.reset();
    }

    /// True until the deadline passes; false on every later call until reset.
    pub fn still_valid(&mut self) -> bool {
        if Instant::now() < self.end {
            return true;
        }
        if !self.reported {
            self.reported = true;
            if let Some(label) = &self.label {
                info!(
                    label = %label,
                    timeout_secs = self.max.as_secs_f64(),
                    "deadline expired"
                );
            }
        }
        false
    }

    pub fn elapsed(&mut self) -> bool {
        !self.still_valid()
    }

    pub fn duration(&self) -> Duration {
        self.max
    }
}

/// Poll `condition` every `interval` until it holds or `deadline` expires.
///
/// Returns whether the condition was observed true.
pub async fn poll_until<F>(deadline: &mut Deadline, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    loop {
        if condition() {
            return true;
        }
        if deadline.elapsed() {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn valid_until_duration_passes() {
        let mut deadline = Deadline::new(Duration::from_secs(5));
        assert!(deadline.still_valid());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(deadline.still_valid());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!deadline.still_valid());
        assert!(deadline.elapsed());

        // Stays expired.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!deadline.still_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_is_expired_immediately() {
        let mut deadline = Deadline::labeled(Duration::ZERO, "zero");
        assert!(deadline.elapsed());
        assert!(deadline.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rearms_with_last_duration() {
        let mut deadline = Deadline::new(Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(deadline.elapsed());

        deadline.reset();
        assert!(deadline.still_valid());
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(deadline.still_valid());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(deadline.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_to_changes_duration() {
        let mut deadline = Deadline::new(Duration::from_secs(1));
        deadline.reset_to(Duration::from_secs(10));
        assert_eq!(deadline.duration(), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(deadline.still_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_stops_on_condition() {
        let mut calls = 0;
        let mut deadline = Deadline::new(Duration::from_secs(10));
        let ok = poll_until(&mut deadline, Duration::from_millis(100), || {
            calls += 1;
            calls == 3
        })
        .await;
        assert!(ok);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_gives_up_at_deadline() {
        let mut deadline = Deadline::new(Duration::from_secs(1));
        let ok = poll_until(&mut deadline, Duration::from_millis(100), || false).await;
        assert!(!ok);
    }
}
