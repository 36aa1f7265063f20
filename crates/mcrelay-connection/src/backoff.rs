//! Reconnection backoff with a linear delay and a hard attempt cap

use std::time::Duration;
use tracing::debug;

/// Linear backoff: the n-th automatic retry waits `base_delay * n`.
///
/// Once `max_attempts` retries have been handed out, [`LinearBackoff::next_delay`] returns
/// `None` and the caller must wait for a manual retry before calling [`LinearBackoff::reset`].
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Consume one attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            debug!(
                "Automatic reconnection exhausted after {} attempts",
                self.attempt
            );
            return None;
        }

        self.attempt += 1;
        let delay = self.base_delay * self.attempt;

        debug!(
            "Waiting {:?} before reconnection attempt {}/{}",
            delay, self.attempt, self.max_attempts
        );

        Some(delay)
    }

    /// Reset the attempt counter (after a successful dial or a manual retry)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of automatic attempts consumed since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let mut backoff = LinearBackoff::new(Duration::from_secs(5), 5);

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![5, 10, 15, 20, 25]);
        assert_eq!(delays.iter().sum::<u64>(), 75);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_reset_starts_fresh_sequence() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(10), 3);

        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_zero_attempts_never_waits() {
        let mut backoff = LinearBackoff::new(Duration::from_secs(1), 0);
        assert!(backoff.next_delay().is_none());
    }
}
