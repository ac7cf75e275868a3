//! Configuration management for the ledger.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::types::FEE_HARD_CAP_BPS;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable set but not parseable
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
    /// Parsed value outside the allowed range
    #[error("{key} is out of range: {reason}")]
    OutOfRange {
        /// Variable name
        key: &'static str,
        /// What is wrong
        reason: String,
    },
}

/// Ledger configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Highest resale fee an issuer may configure, in basis points (<= 3000)
    pub fee_cap_bps: u16,
    /// Largest capacity a single sale may be created with
    pub max_capacity: u32,
    /// How long shutdown waits for in-flight payouts
    pub shutdown_timeout: Duration,
    /// Default `tracing` filter when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee_cap_bps: FEE_HARD_CAP_BPS,
            max_capacity: 1_000_000,
            shutdown_timeout: Duration::from_secs(30),
            log_filter: "info,ticket_resale_ledger=debug".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from the process environment.
    ///
    /// Reads `TICKETING_FEE_CAP_BPS`, `TICKETING_MAX_CAPACITY`,
    /// `TICKETING_SHUTDOWN_TIMEOUT_SECS` and `TICKETING_LOG_FILTER`. Unset
    /// variables take their default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`LedgerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let requested_cap: u16 = parse_or(&lookup, "TICKETING_FEE_CAP_BPS", defaults.fee_cap_bps)?;
        let fee_cap_bps = if requested_cap > FEE_HARD_CAP_BPS {
            tracing::warn!(
                requested = requested_cap,
                hard_cap = FEE_HARD_CAP_BPS,
                "Fee cap above hard cap, clamping"
            );
            FEE_HARD_CAP_BPS
        } else {
            requested_cap
        };

        let max_capacity = parse_or(&lookup, "TICKETING_MAX_CAPACITY", defaults.max_capacity)?;
        if max_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                key: "TICKETING_MAX_CAPACITY",
                reason: "must be greater than zero".to_string(),
            });
        }

        let shutdown_secs = parse_or(
            &lookup,
            "TICKETING_SHUTDOWN_TIMEOUT_SECS",
            defaults.shutdown_timeout.as_secs(),
        )?;

        let log_filter = lookup("TICKETING_LOG_FILTER")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.log_filter);

        Ok(Self {
            fee_cap_bps,
            max_capacity,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            log_filter,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
