//! Drain policy configuration
//!
//! Defaults mirror `kubectl drain --ignore-daemonsets`: DaemonSet pods stay,
//! unmanaged pods and pods using emptyDir volumes block the drain. Values can
//! be loaded from a TOML file and are then overridden by CLI flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_PARALLELISM: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;
/// Longest accepted drain deadline, in seconds
pub const MAX_TIMEOUT_SECS: f64 = u32::MAX as f64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrainConfig {
    /// Evict DaemonSet-managed pods instead of skipping them
    pub evict_daemonsets: bool,
    /// Evict pods that have no controlling owner
    pub force: bool,
    /// Evict pods using emptyDir volumes, losing their local data
    pub delete_emptydir_data: bool,
    /// Eviction attempts per pod before it is reported failed
    pub max_attempts: u32,
    /// Evictions in flight at once
    pub parallelism: usize,
    /// Global deadline for the drain phase, in seconds
    pub timeout_secs: f64,
    /// First retry delay; doubles per attempt
    pub backoff_base_ms: u64,
    /// Upper bound for a single retry delay
    pub backoff_max_ms: u64,
    /// Wait until evicted pods are actually deleted
    pub wait_for_deletion: bool,
    pub deletion_poll_interval_ms: u64,
    /// Read-modify-write retries when cordoning races another writer
    pub conflict_retries: u32,
    /// Classify pods and report the plan without cordoning or evicting
    pub dry_run: bool,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            evict_daemonsets: false,
            force: false,
            delete_emptydir_data: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            parallelism: DEFAULT_PARALLELISM,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            wait_for_deletion: true,
            deletion_poll_interval_ms: 2_000,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            dry_run: false,
        }
    }
}

impl DrainConfig {
    /// Load a config file; keys not present keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: DrainConfig = toml::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::ConfigError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            return Err(Error::ConfigError(format!(
                "timeout_secs must be a non-negative number, got {}",
                self.timeout_secs
            )));
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::ConfigError(format!(
                "timeout_secs must be at most {MAX_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            )));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(Error::ConfigError(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(if self.timeout_secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }

    pub fn deletion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deletion_poll_interval_ms)
    }
}
