//! Controller configuration
//!
//! Read once at startup from environment variables. Parsing goes through a
//! lookup closure so it can be tested without touching the process
//! environment.

use crate::error::ControllerError;
use inventory::EngineSettings;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Namespace the controller operates in
pub const NAMESPACE_VAR: &str = "MY_POD_NAMESPACE";
/// Reschedule interval while a NodePool waits for nodes
pub const REQUEUE_SECONDS_VAR: &str = "HWMGR_REQUEUE_SECONDS";
/// Artificial delay before each allocation step
pub const ALLOCATION_DELAY_SECONDS_VAR: &str = "HWMGR_ALLOCATION_DELAY_SECONDS";
/// Compare-and-write retry bound
pub const CONFLICT_RETRIES_VAR: &str = "HWMGR_CONFLICT_RETRIES";
/// Maximum concurrent reconciliations
pub const CONCURRENCY_VAR: &str = "HWMGR_CONCURRENCY";

/// Runtime configuration of the NodePool Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding NodePools, Nodes, secrets and the inventory ConfigMap
    pub namespace: String,
    /// Short reschedule interval while allocation is incomplete
    pub requeue_interval: Duration,
    /// Delay before each allocation step
    pub allocation_delay: Duration,
    /// How often a conflicting inventory write is retried
    pub conflict_retries: u32,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            requeue_interval: Duration::from_secs(15),
            allocation_delay: Duration::ZERO,
            conflict_retries: 5,
            concurrency: 3,
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset or blank variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup(NAMESPACE_VAR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.namespace);

        let requeue_seconds = parse_var(&lookup, REQUEUE_SECONDS_VAR, defaults.requeue_interval.as_secs())?;
        if requeue_seconds == 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "{} must be greater than zero",
                REQUEUE_SECONDS_VAR
            )));
        }

        let delay_seconds = parse_var(&lookup, ALLOCATION_DELAY_SECONDS_VAR, defaults.allocation_delay.as_secs())?;
        let conflict_retries = parse_var(&lookup, CONFLICT_RETRIES_VAR, defaults.conflict_retries)?;

        let concurrency = parse_var(&lookup, CONCURRENCY_VAR, defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "{} must be greater than zero",
                CONCURRENCY_VAR
            )));
        }

        Ok(Self {
            namespace,
            requeue_interval: Duration::from_secs(requeue_seconds),
            allocation_delay: Duration::from_secs(delay_seconds),
            conflict_retries,
            concurrency,
        })
    }

    /// Allocation engine settings derived from this configuration
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_conflict_retries: self.conflict_retries,
            allocation_delay: self.allocation_delay,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}
