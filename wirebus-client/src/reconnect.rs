//! Reconnection policy.

use std::time::Duration;

/// Decides whether and when to re-dial after the connection drops.
pub trait ReconnectStrategy: Send + Sync {
    /// Whether to attempt reconnect number `attempt` (0-based).
    fn should_reconnect(&self, attempt: u32) -> bool;

    /// How long to wait before attempt number `attempt`.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with a cap, giving up after a fixed number of
/// attempts.
#[derive(Debug, Clone)]
pub struct DefaultReconnectStrategy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for DefaultReconnectStrategy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
        }
    }
}

impl ReconnectStrategy for DefaultReconnectStrategy {
    fn should_reconnect(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let strategy = DefaultReconnectStrategy::default();

        assert_eq!(strategy.delay(0), Duration::from_millis(500));
        assert_eq!(strategy.delay(1), Duration::from_secs(1));
        assert_eq!(strategy.delay(2), Duration::from_secs(2));
        assert_eq!(strategy.delay(10), Duration::from_secs(30));
        assert_eq!(strategy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let strategy = DefaultReconnectStrategy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(strategy.should_reconnect(0));
        assert!(strategy.should_reconnect(2));
        assert!(!strategy.should_reconnect(3));
    }
}
