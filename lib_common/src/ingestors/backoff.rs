//! Reconnect delays: multiplicative growth from `initial`, capped at `max`,
//! back to `initial` after every successful connect.

use std::time::Duration;

/// Shape of the reconnect delay sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First delay after a drop.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per consecutive failure. Values below 1.0 are treated as 1.0.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            factor: 1.5,
        }
    }
}

impl BackoffPolicy {
    /// A fresh delay sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.initial.min(self.max),
        }
    }
}

/// Position in a delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// The delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = (self.current.as_millis() as f64 * self.policy.factor.max(1.0)).floor();
        let max_ms = self.policy.max.as_millis() as f64;
        self.current = Duration::from_millis(grown.min(max_ms) as u64);
        delay
    }

    /// The delay `next_delay` would return, without advancing.
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence() {
        let mut b = BackoffPolicy::default().start();
        let ms: Vec<u128> = (0..5).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(ms, [1000, 1500, 2250, 3375, 5062]);
    }

    #[test]
    fn repeated_drops_are_non_decreasing_and_capped() {
        let policy = BackoffPolicy::default();
        let mut b = policy.start();
        let delays: Vec<Duration> = (0..40).map(|_| b.next_delay()).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max));
        assert_eq!(*delays.last().unwrap(), policy.max);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = BackoffPolicy::default().start();
        for _ in 0..6 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn shrinking_factor_does_not_shrink() {
        let mut b = BackoffPolicy {
            factor: 0.5,
            ..BackoffPolicy::default()
        }
        .start();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
