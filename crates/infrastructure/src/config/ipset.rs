//! Set lifecycle engine configuration section.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_SETS, DEFAULT_SYNC_INTERVAL};

use super::common::{ConfigError, MAX_SETS_CEILING, check_limit, default_true};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSetConfig {
    /// Upper bound on cached set entities. The engine refuses to create
    /// sets past this limit with a typed error; nothing is silently
    /// dropped.
    #[serde(default = "default_max_sets")]
    pub max_sets: usize,

    /// Seconds between dataplane reconciliation passes.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Seconds between orphan-reclamation sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Whether the agent drives a kernel dataplane. Disabled runs the
    /// engine cache-only, which is what integration environments without
    /// kernel privileges use.
    #[serde(default = "default_true")]
    pub dataplane_enabled: bool,
}

impl Default for IpSetConfig {
    fn default() -> Self {
        Self {
            max_sets: default_max_sets(),
            sync_interval_secs: default_sync_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            dataplane_enabled: true,
        }
    }
}

impl IpSetConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sets == 0 {
            return Err(ConfigError::Validation {
                field: "ipset.max_sets".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        check_limit("ipset.max_sets", self.max_sets, MAX_SETS_CEILING)?;
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "ipset.sync_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "ipset.cleanup_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_max_sets() -> usize {
    DEFAULT_MAX_SETS
}

fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL.as_secs()
}

fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        IpSetConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_max_sets_rejected() {
        let cfg = IpSetConfig {
            max_sets: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn absurd_max_sets_rejected() {
        let cfg = IpSetConfig {
            max_sets: MAX_SETS_CEILING + 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_intervals_rejected() {
        let cfg = IpSetConfig {
            sync_interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = IpSetConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
