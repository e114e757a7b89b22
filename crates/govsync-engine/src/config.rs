//! Engine configuration.
//!
//! Timing knobs live here and nowhere else; call sites never pick their own
//! retry counts or delays.

use std::time::Duration;

use govsync_api::ErrorClassifier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub poller: PollerSettings,
    /// Wait after a shared sub-resource was patched, before the lock is released.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub classifier: ErrorClassifier,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            poller: PollerSettings::default(),
            settle_delay_ms: default_settle_delay_ms(),
            classifier: ErrorClassifier::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    6
}
fn default_initial_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Wall-clock budget for one materialization.
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
    /// Report an unmaterialized request as an error instead of a pending outcome.
    #[serde(default)]
    pub fail_on_timeout: bool,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_poll_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
            fail_on_timeout: false,
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    10_000
}

impl EngineConfig {
    /// Millisecond-scale timings for tests.
    pub fn for_testing() -> Self {
        Self {
            retry: RetrySettings {
                max_attempts: 4,
                initial_delay_ms: 5,
                max_delay_ms: 20,
            },
            poller: PollerSettings {
                interval_ms: 5,
                timeout_ms: 200,
                fail_on_timeout: false,
            },
            settle_delay_ms: 30,
            classifier: ErrorClassifier::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry.max_attempts == 0 {
            return Err("engine.retry.max_attempts must be > 0".into());
        }
        if self.retry.initial_delay_ms == 0 {
            return Err("engine.retry.initial_delay_ms must be > 0".into());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err("engine.retry.initial_delay_ms must be <= engine.retry.max_delay_ms".into());
        }
        if self.poller.interval_ms == 0 {
            return Err("engine.poller.interval_ms must be > 0".into());
        }
        if self.poller.timeout_ms < self.poller.interval_ms {
            return Err("engine.poller.timeout_ms must be >= engine.poller.interval_ms".into());
        }
        self.classifier.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poller.timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"retry": {"max_attempts": 2}}"#).unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
        assert_eq!(cfg.settle_delay_ms, 10_000);
        assert!(!cfg.poller.fail_on_timeout);
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let mut cfg = EngineConfig::for_testing();
        cfg.retry.initial_delay_ms = 100;
        cfg.retry.max_delay_ms = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::for_testing();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
