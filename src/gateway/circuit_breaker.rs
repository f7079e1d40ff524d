//! Per-connector circuit breaker.
//!
//! Time is passed in explicitly so transitions are deterministic under test.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects before allowing a trial.
    pub cooldown: Duration,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Start of the single in-flight half-open trial.
    trial_started_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started_at: None,
        }
    }

    /// State as observed at `now`. An open circuit whose cooldown elapsed
    /// reports `HalfOpen` even before the next request transitions it.
    pub fn state(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_elapsed(now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Admits a request or returns how long the caller should wait.
    ///
    /// In `HalfOpen` exactly one trial is admitted; others are rejected until
    /// it completes. A trial that never reports back is abandoned after one
    /// cooldown period.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.cooldown_elapsed(now) {
                    self.state = CircuitState::HalfOpen;
                    self.trial_started_at = Some(now);
                    Ok(())
                } else {
                    Err(self.remaining_cooldown(now))
                }
            }
            CircuitState::HalfOpen => match self.trial_started_at {
                Some(started) if now.duration_since(started) < self.policy.cooldown => {
                    Err(self.policy.cooldown - now.duration_since(started))
                }
                _ => {
                    self.trial_started_at = Some(now);
                    Ok(())
                }
            },
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_started_at = None;
    }

    /// Returns `true` when this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.policy.failure_threshold {
                    self.open(now);
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.open(now);
                true
            }
            // late result of a request admitted before the circuit opened
            CircuitState::Open => false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .is_none_or(|opened| now.duration_since(opened) >= self.policy.cooldown)
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.opened_at
            .map(|opened| self.policy.cooldown.saturating_sub(now.duration_since(opened)))
            .unwrap_or_default()
    }
}
