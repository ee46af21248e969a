//! Exponential backoff with jitter for feed and bus reconnects

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random (0.1 = ±10%)
    pub jitter_factor: f64,
    /// 0 = unlimited
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.current_delay);
        let next = self.current_delay.mul_f64(self.config.multiplier.max(1.0));
        self.current_delay = next.min(self.config.max_delay);

        Some(delay)
    }

    /// Call after a connection is fully established
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let base = delay.as_secs_f64();
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base + jitter).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor: 0.0,
            max_attempts,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let delays: Vec<u64> = (0..8).map(|_| policy.next_delay().unwrap().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_max_attempts_and_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..50 {
            policy.reset();
            let delay = policy.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
        }
    }
}
