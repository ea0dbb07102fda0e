//! Configuration for credsync

use crate::credential::CredentialFlags;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory (`credsync.toml`)
pub const DEFAULT_CONFIG_FILE: &str = "credsync";

/// Prefix for environment overrides, e.g. `CREDSYNC_RETRY__MAX_ATTEMPTS=30`
pub const ENV_PREFIX: &str = "CREDSYNC";

/// Largest accepted `retry.max_attempts`; the root keeps one histogram
/// bucket per attempt value.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100_000;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of ranks in the group
    pub group_size: usize,

    /// Flags passed to the root's acquire call
    pub acquire_flags: CredentialFlags,

    /// Redemption polling policy
    pub retry: RetryPolicy,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group_size: 1,
            acquire_flags: CredentialFlags::FLEX_CREDENTIAL,
            retry: RetryPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bounded fixed-interval polling policy for redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed attempts allowed before the rank gives up
    pub max_attempts: u32,

    /// Sleep before each access attempt
    pub poll_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    120
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, poll_interval: Duration) -> crate::Result<Self> {
        let mut policy = Self {
            max_attempts,
            poll_interval_ms: 0,
        };
        policy.set_poll_interval(poll_interval)?;
        Ok(policy)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn set_poll_interval(&mut self, interval: Duration) -> crate::Result<()> {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).map_err(|_| {
            crate::Error::InvalidConfig(format!("poll interval too large: {:?}", interval))
        })?;
        Ok(())
    }
}

impl Config {
    /// Load from `credsync.toml` (if present) and `CREDSYNC_*` environment
    /// variables, on top of the defaults.
    pub fn load() -> crate::Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`Config::load`], reading an explicit file instead of the
    /// default one. An explicit file must exist.
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.group_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "group_size must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(crate::Error::InvalidConfig(format!(
                "retry.max_attempts must be at most {}",
                MAX_ATTEMPTS_LIMIT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 120);
        assert_eq!(config.retry.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.acquire_flags, CredentialFlags::FLEX_CREDENTIAL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let config = Config {
            group_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_max_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = MAX_ATTEMPTS_LIMIT;
        assert!(config.validate().is_ok());

        config.retry.max_attempts = 4_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::Error::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_poll_interval_is_rejected() {
        let err = RetryPolicy::new(3, Duration::MAX).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidConfig(_)));

        let mut policy = RetryPolicy::default();
        assert!(policy.set_poll_interval(Duration::MAX).is_err());
        assert_eq!(policy.poll_interval_ms, 1000);
        policy.set_poll_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(policy.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "group_size = 8\nlog_level = \"debug\"\n\n[retry]\nmax_attempts = 30\npoll_interval_ms = 250"
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.group_size, 8);
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.retry,
            RetryPolicy::new(30, Duration::from_millis(250)).unwrap()
        );
        assert_eq!(config.acquire_flags, CredentialFlags::FLEX_CREDENTIAL);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();
        assert!(Config::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(Config::load_from(Some(&path)).is_err());
    }
}
