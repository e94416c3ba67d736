use crate::core::time::Duration;

/// Bounded retry schedule: doubles the delay after every failed attempt up to `max_delay`
/// and gives up after `max_attempts` attempts in total.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay.as_millis();
        let multiplier = 2i64.saturating_pow(self.attempts.saturating_sub(1).min(31));
        let delay = base.saturating_mul(multiplier).min(self.max_delay.as_millis());
        Duration::millis(delay)
    }

    /// Registers a failed attempt. Returns the delay to wait before the next attempt,
    /// or `None` once all attempts are used up.
    pub fn bump(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);

        if self.exhausted() {
            None
        } else {
            Some(self.next_delay())
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Upper bound of the time spent waiting between all attempts.
    pub fn max_total_delay(&self) -> Duration {
        let mut replay = Self::new(self.max_attempts, self.base_delay, self.max_delay);
        let mut total = Duration::zero();

        while let Some(delay) = replay.bump() {
            total = total + delay;
        }

        total
    }
}
