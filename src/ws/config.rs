#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval for sending `heartbeat` frames while connected
    pub heartbeat_interval: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Backoff duration for the first reconnection attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff duration
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff)
    }
}

/// Capped doubling backoff: attempt `n` waits `min(initial * 2^(n - 1), max)`.
///
/// Unlike [`backoff::ExponentialBackoff`] there is no jitter, so consecutive delays are
/// exactly reproducible and never exceed `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last [`Backoff::reset`].
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the given 1-based attempt number.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2_u32
            .checked_pow(exponent)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Backoff for ReconnectBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay_for(self.attempt))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial: u64, max: u64) -> ReconnectBackoff {
        ReconnectBackoff::new(Duration::from_secs(initial), Duration::from_secs(max))
    }

    #[test]
    fn backoff_doubles_from_initial() {
        let mut backoff = backoff(1, 30);

        let delays: Vec<_> = (0..3).filter_map(|_| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn backoff_respects_max() {
        let mut backoff = backoff(1, 30);

        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= previous, "delays must not decrease");
            assert!(delay <= Duration::from_secs(30), "delay exceeded max");
            previous = delay;
        }

        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn reset_starts_over_at_initial() {
        let mut backoff = backoff(1, 30);
        for _ in 0..4 {
            let _next = backoff.next_backoff();
        }

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn default_config_matches_server_contract() {
        let config = Config::default();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert_eq!(config.reconnect.initial_backoff, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn from_config_uses_initial_and_max() {
        let config = ReconnectConfig {
            max_attempts: None,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        };
        let backoff = ReconnectBackoff::from(&config);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(250));
    }
}
