//! Configuration module for sqlherd.

use crate::error::{HerdError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the interval between status-check retries.
pub const ENV_CHECK_INTERVAL: &str = "SQLHERD_CHECK_INTERVAL";

/// Environment variable overriding the wait after a clone restarts mysqld.
pub const ENV_WAIT_INTERVAL: &str = "SQLHERD_WAIT_INTERVAL";

/// Main configuration for the clustering control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// Interval between two evaluation cycles of a cluster.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Status gathering settings.
    pub status: StatusCheckConfig,
    /// Settings for corrective operations.
    pub operations: OperationsConfig,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            status: StatusCheckConfig::default(),
            operations: OperationsConfig::default(),
        }
    }
}

impl HerdConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HerdError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HerdError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply the environment overrides for retry and restart intervals.
    ///
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(d) = env_duration(ENV_CHECK_INTERVAL) {
            self.status.retry_interval = d;
        }
        if let Some(d) = env_duration(ENV_WAIT_INTERVAL) {
            self.operations.wait_for_restart = d;
        }
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(HerdError::InvalidConfig {
                field: "check_interval".to_string(),
                reason: "Check interval must be non-zero".to_string(),
            });
        }

        if self.operations.switchover_timeout_secs == 0 {
            return Err(HerdError::InvalidConfig {
                field: "operations.switchover_timeout_secs".to_string(),
                reason: "A switchover must wait for a bounded time".to_string(),
            });
        }

        if self.operations.clone_poll_attempts == 0 {
            return Err(HerdError::InvalidConfig {
                field: "operations.clone_poll_attempts".to_string(),
                reason: "At least one poll is needed after a clone".to_string(),
            });
        }

        Ok(())
    }

    /// Configuration with short delays, for tests and local development.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_millis(200),
            status: StatusCheckConfig {
                retry_max: 2,
                retry_interval: Duration::from_millis(10),
                primary_settle: Duration::from_millis(1),
            },
            operations: OperationsConfig {
                wait_for_restart: Duration::from_millis(1),
                clone_poll_attempts: 5,
                clone_poll_interval: Duration::from_millis(1),
                switchover_timeout_secs: 70,
                failover_timeout_secs: 3600,
                settle_delay: Duration::from_millis(1),
            },
        }
    }
}

/// Status gathering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCheckConfig {
    /// Retries after the first failed status query of an instance.
    pub retry_max: u32,
    /// Fixed delay between two status queries of an instance.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Delay before re-reading the primary's executed GTID set.
    #[serde(with = "humantime_serde")]
    pub primary_settle: Duration,
}

impl Default for StatusCheckConfig {
    fn default() -> Self {
        Self {
            retry_max: 2,
            retry_interval: Duration::from_secs(3),
            primary_settle: Duration::from_millis(100),
        }
    }
}

/// Corrective operation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Wait before polling an instance restarted by a clone.
    #[serde(with = "humantime_serde")]
    pub wait_for_restart: Duration,
    /// Polls of a cloned instance before giving up waiting.
    pub clone_poll_attempts: u32,
    /// Delay between two polls of a cloned instance.
    #[serde(with = "humantime_serde")]
    pub clone_poll_interval: Duration,
    /// Bound on the candidate catch-up during a switchover.
    pub switchover_timeout_secs: u32,
    /// Bound on the candidate catch-up during a failover.
    pub failover_timeout_secs: u32,
    /// Short pause after toggling read-only or replication threads.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            wait_for_restart: Duration::from_secs(3),
            clone_poll_attempts: 60,
            clone_poll_interval: Duration::from_secs(1),
            switchover_timeout_secs: 70,
            failover_timeout_secs: 3600,
            settle_delay: Duration::from_millis(100),
        }
    }
}

fn env_duration(key: &str) -> Option<Duration> {
    let value = std::env::var(key).ok()?;
    humantime_serde::parse_duration(&value).ok()
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `100ms`, `3s`, `1m` or a bare millisecond count.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HerdConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.status.retry_max, 2);
        assert_eq!(config.operations.switchover_timeout_secs, 70);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = HerdConfig::development();
        assert!(config.validate().is_ok());
        assert!(config.check_interval < Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = HerdConfig {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HerdError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"check_interval": "5s", "status": {{"retry_interval": "250ms"}}}}"#
        )
        .unwrap();

        let config = HerdConfig::from_file(file.path()).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.status.retry_interval, Duration::from_millis(250));
        assert_eq!(config.status.retry_max, 2);
        assert_eq!(config.operations, OperationsConfig::default());
    }

    #[test]
    fn test_parse_duration() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("42").unwrap(), Duration::from_millis(42));
        assert!(parse_duration("soon").is_err());
    }
}
