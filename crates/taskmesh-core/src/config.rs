//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Default interval between background sweeps
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// How remote semantic rejections (4xx other than 401/403/404) are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Treat like any other failure and retry until the budget runs out
    #[default]
    Retry,
    /// Move the record to `Failed` on the first rejection
    FailFast,
}

/// Configuration for the sync engine and its orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Background sweep interval in seconds; `None` disables the timer
    #[serde(with = "optional_secs")]
    pub sweep_interval: Option<Duration>,
    pub rejection_policy: RejectionPolicy,
    /// Capacity of the change-notification channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)),
            rejection_policy: RejectionPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config document; missing fields take defaults.
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid engine config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json_str(&payload)
    }

    /// Set the background sweep interval
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Disable the periodic sweep (connectivity and manual triggers only)
    #[must_use]
    pub const fn without_auto_sweep(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::Config(
                "retry.base_delay must not exceed retry.max_delay".into(),
            ));
        }
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::Config("sweep_interval must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.rejection_policy, RejectionPolicy::Retry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = EngineConfig::default()
            .with_sweep_interval(Duration::from_secs(5))
            .with_rejection_policy(RejectionPolicy::FailFast);
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.rejection_policy, RejectionPolicy::FailFast);

        let manual = config.without_auto_sweep();
        assert_eq!(manual.sweep_interval, None);
    }

    #[test]
    fn parses_partial_json() {
        let config = EngineConfig::from_json_str(
            r#"{"sweep_interval": 30, "rejection_policy": "fail_fast", "retry": {"max_attempts": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.rejection_policy, RejectionPolicy::FailFast);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn null_interval_disables_timer() {
        let config = EngineConfig::from_json_str(r#"{"sweep_interval": null}"#).unwrap();
        assert_eq!(config.sweep_interval, None);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"sweep_interval": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"unknown": true}"#).is_err());
    }
}
