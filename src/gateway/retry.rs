//! Bounded retry with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use reqwest::Method;

use crate::config::GatewayConfig;
use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the delay randomly added or removed, 0.0-1.0.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Whether a failure of `attempt` (1-based) may be retried.
    ///
    /// Only idempotent methods are retried so a push is never duplicated
    /// upstream.
    pub fn should_retry(&self, method: &Method, error: &HubError, attempt: u32) -> bool {
        attempt <= self.max_retries && is_idempotent(method) && error.is_retryable()
    }

    /// Delay before retry number `retry` (1-based), capped and jittered.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
        base.mul_f64((1.0 + spread).max(0.0)).min(self.max_backoff)
    }

    fn base_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            max_backoff: Duration::from_secs(10),
            ..policy()
        };
        for _ in 0..100 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_retry_classification() {
        let policy = policy();
        let connector_id = Uuid::new_v4();
        let timeout = HubError::Timeout {
            connector_id,
            timeout_ms: 10,
            duration_ms: 10,
        };
        let server_error = HubError::gateway(connector_id, Some(503), None, 5);
        let client_error = HubError::gateway(connector_id, Some(400), None, 5);

        assert!(policy.should_retry(&Method::GET, &timeout, 1));
        assert!(policy.should_retry(&Method::PUT, &server_error, 2));
        assert!(!policy.should_retry(&Method::GET, &server_error, 3));
        assert!(!policy.should_retry(&Method::GET, &client_error, 1));
        assert!(!policy.should_retry(&Method::POST, &timeout, 1));
        assert!(!policy.should_retry(&Method::PATCH, &server_error, 1));
    }

    #[test]
    fn test_none_never_retries() {
        let timeout = HubError::Timeout {
            connector_id: Uuid::new_v4(),
            timeout_ms: 10,
            duration_ms: 10,
        };
        assert!(!RetryPolicy::none().should_retry(&Method::GET, &timeout, 1));
    }
}
