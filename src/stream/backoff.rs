use std::time::Duration;

/// Reconnect delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        let initial_delay_ms = initial_delay_ms.max(1);
        Self {
            initial_delay_ms,
            max_delay_ms: max_delay_ms.max(initial_delay_ms),
        }
    }

    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(500, 5_000)
    }
}

/// Current reconnect delay, always within `[initial, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current_delay_ms: u64,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current_delay_ms: policy.initial_delay_ms,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }

    /// Successful connection: start over from the initial delay.
    pub fn reset(&mut self) {
        self.current_delay_ms = self.policy.initial_delay_ms;
    }

    /// Connection lost: returns the delay to wait before the next attempt and
    /// doubles the stored delay for the loss after that.
    pub fn on_loss(&mut self) -> Duration {
        let delay = self.current();
        self.current_delay_ms = self
            .current_delay_ms
            .saturating_mul(2)
            .min(self.policy.max_delay_ms);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(backoff: &mut Backoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.on_loss().as_millis() as u64).collect()
    }

    #[test]
    fn doubles_then_caps() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        assert_eq!(
            millis(&mut backoff, 8),
            vec![500, 1_000, 2_000, 4_000, 5_000, 5_000, 5_000, 5_000]
        );
    }

    #[test]
    fn resets_to_initial_delay() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        millis(&mut backoff, 5);
        backoff.reset();
        assert_eq!(backoff.on_loss(), Duration::from_millis(500));
        assert_eq!(backoff.current(), Duration::from_millis(1_000));
    }

    #[test]
    fn caps_when_max_is_not_a_power_of_two_multiple() {
        let mut backoff = Backoff::new(BackoffPolicy::new(300, 1_000));
        assert_eq!(millis(&mut backoff, 4), vec![300, 600, 1_000, 1_000]);
    }

    #[test]
    fn clamps_degenerate_policies() {
        let policy = BackoffPolicy::new(0, 0);
        assert_eq!(policy.initial_delay_ms(), 1);
        assert_eq!(policy.max_delay_ms(), 1);

        let policy = BackoffPolicy::new(800, 100);
        assert_eq!(policy.max_delay_ms(), 800);
    }
}
