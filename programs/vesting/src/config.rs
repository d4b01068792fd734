//! Runtime configuration for the vesting module.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CACHE_REFRESH_INTERVAL, DEFAULT_COIN_POWER, DEFAULT_DENOM, MAX_COIN_POWER,
    ORACLE_REQUEST_TIMEOUT,
};
use crate::error::ConfigError;
use crate::instructions::ActivationPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingConfig {
    /// Oracle base URL, e.g. `https://oracle.example/gridspork`.
    pub oracle_url: String,
    pub denom: String,
    /// Decimal places between base and display units.
    pub coin_power: u32,
    /// Fractional digits shown in admission errors.
    pub display_precision: u32,
    pub refresh_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub accept_invalid_certs: bool,
    pub activation_policy: ActivationPolicy,
    /// Trigger an extra refresh from the block hook every N heights. 0 disables.
    pub refresh_every_blocks: u64,
    /// Skip the full fetch while the oracle's `lastchanged` stamp is unchanged.
    pub change_detection: bool,
    /// Where processed markers are persisted. In memory only when unset.
    pub processed_store_path: Option<PathBuf>,
}

impl Default for VestingConfig {
    fn default() -> Self {
        Self {
            oracle_url: String::new(),
            denom: DEFAULT_DENOM.to_owned(),
            coin_power: DEFAULT_COIN_POWER,
            display_precision: DEFAULT_COIN_POWER,
            refresh_interval_secs: CACHE_REFRESH_INTERVAL.as_secs(),
            request_timeout_ms: ORACLE_REQUEST_TIMEOUT.as_millis() as u64,
            accept_invalid_certs: true,
            activation_policy: ActivationPolicy::AtHeight,
            refresh_every_blocks: 0,
            change_detection: false,
            processed_store_path: None,
        }
    }
}

impl VestingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Defaults overridden by `VESTING_*` environment variables:
    ///
    /// - `VESTING_ORACLE_URL` oracle base URL
    /// - `VESTING_DENOM` governed denomination (default `ugd`)
    /// - `VESTING_COIN_POWER` decimal scale (default 18)
    /// - `VESTING_DISPLAY_PRECISION` digits rendered in errors (default 18)
    /// - `VESTING_REFRESH_INTERVAL_SECS` refresh period (default 15)
    /// - `VESTING_REQUEST_TIMEOUT_MS` per-request timeout (default 5000)
    /// - `VESTING_ACCEPT_INVALID_CERTS` `true`/`false` (default true)
    /// - `VESTING_ACTIVATION_POLICY` `at-height` or `continuous`
    /// - `VESTING_REFRESH_EVERY_BLOCKS` block-driven refresh cadence (default 0)
    /// - `VESTING_CHANGE_DETECTION` `true`/`false` (default false)
    /// - `VESTING_PROCESSED_STORE` path of the processed-marker file
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(url) = lookup("VESTING_ORACLE_URL") {
            cfg.oracle_url = url.trim().to_owned();
        }
        if let Some(denom) = lookup("VESTING_DENOM") {
            cfg.denom = denom.trim().to_owned();
        }
        if let Some(v) = parsed(&lookup, "VESTING_COIN_POWER")? {
            cfg.coin_power = v;
            cfg.display_precision = v;
        }
        if let Some(v) = parsed(&lookup, "VESTING_DISPLAY_PRECISION")? {
            cfg.display_precision = v;
        }
        if let Some(v) = parsed(&lookup, "VESTING_REFRESH_INTERVAL_SECS")? {
            cfg.refresh_interval_secs = v;
        }
        if let Some(v) = parsed(&lookup, "VESTING_REQUEST_TIMEOUT_MS")? {
            cfg.request_timeout_ms = v;
        }
        if let Some(v) = flag(&lookup, "VESTING_ACCEPT_INVALID_CERTS")? {
            cfg.accept_invalid_certs = v;
        }
        if let Some(v) = parsed(&lookup, "VESTING_ACTIVATION_POLICY")? {
            cfg.activation_policy = v;
        }
        if let Some(v) = parsed(&lookup, "VESTING_REFRESH_EVERY_BLOCKS")? {
            cfg.refresh_every_blocks = v;
        }
        if let Some(v) = flag(&lookup, "VESTING_CHANGE_DETECTION")? {
            cfg.change_detection = v;
        }
        if let Some(path) = lookup("VESTING_PROCESSED_STORE").filter(|p| !p.trim().is_empty()) {
            cfg.processed_store_path = Some(PathBuf::from(path.trim()));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.denom.is_empty() {
            return Err(ConfigError::Invalid("denom must not be empty".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh interval must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request timeout must be positive".into()));
        }
        if self.coin_power > MAX_COIN_POWER {
            return Err(ConfigError::Invalid(format!(
                "coin power {} exceeds {MAX_COIN_POWER}",
                self.coin_power
            )));
        }
        if self.display_precision > self.coin_power {
            return Err(ConfigError::Invalid(format!(
                "display precision {} exceeds coin power {}",
                self.display_precision, self.coin_power
            )));
        }
        Ok(())
    }
}

impl FromStr for ActivationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at-height" | "at_height" => Ok(ActivationPolicy::AtHeight),
            "continuous" => Ok(ActivationPolicy::Continuous),
            other => Err(ConfigError::Invalid(format!("unknown activation policy {other:?}"))),
        }
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}

fn flag<F>(lookup: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { name, value: raw }),
        },
    }
}
