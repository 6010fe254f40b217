//! Retry scheduling: exponential backoff with a hard attempt budget

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{SyncState, SyncStatus};

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still within budget; the orchestrator will try again after backoff
    Retry,
    /// Budget used up; the record is now `Failed`
    Exhausted,
}

/// Backoff parameters: `delay = min(base_delay * 2^attempts, max_delay)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after `attempts` failures
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether the record may be attempted at `now`.
    pub fn is_eligible(&self, state: &SyncState, now: DateTime<Utc>) -> bool {
        if state.attempts >= self.max_attempts {
            return false;
        }
        let Some(last_attempt_at) = state.last_attempt_at else {
            return true;
        };
        let delay = chrono::Duration::from_std(self.delay_for(state.attempts))
            .unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last_attempt_at) >= delay
    }

    /// Bookkeeping for one failed network attempt.
    pub fn record_failure(
        &self,
        state: &mut SyncState,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        state.attempts = state.attempts.saturating_add(1);
        state.last_attempt_at = Some(now);
        state.last_error = Some(error.into());

        if state.attempts >= self.max_attempts {
            self.exhaust(state);
            FailureOutcome::Exhausted
        } else {
            FailureOutcome::Retry
        }
    }

    /// Move a record to `Failed` without waiting out the budget.
    pub fn exhaust(&self, state: &mut SyncState) {
        if state.status != SyncStatus::Failed {
            state.failed_from = Some(state.status);
            state.status = SyncStatus::Failed;
        }
        state.attempts = state.attempts.max(self.max_attempts);
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
