//! Exponential retry backoff.

use std::time::Duration;

use sift_core::EngineConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Delay before the first retry.
  pub initial: Duration,
  /// Ceiling for any single delay.
  pub max: Duration,
  /// Exponential factor per attempt.
  pub multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      initial: Duration::from_secs(1),
      max: Duration::from_secs(60),
      multiplier: 2.0,
    }
  }
}

impl From<&EngineConfig> for RetryPolicy {
  fn from(config: &EngineConfig) -> Self {
    Self {
      initial: Duration::from_millis(config.backoff_initial_ms),
      max: Duration::from_millis(config.backoff_max_ms),
      multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// Delay before retry number `attempt` (0-based: the first retry is
  /// attempt 0).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
    Duration::from_secs_f64(base.min(self.max.as_secs_f64()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_delays_grow_exponentially() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
  }

  #[test]
  fn test_delay_is_capped() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
  }

  #[test]
  fn test_from_engine_config() {
    let config = EngineConfig {
      backoff_initial_ms: 250,
      backoff_max_ms: 1_000,
      ..EngineConfig::default()
    };
    let policy = RetryPolicy::from(&config);
    assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
    assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
  }
}
