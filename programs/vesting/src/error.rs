use thiserror::Error;

use crate::state::Address;

/// Malformed interval-notation duration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid ISO 8601 duration format: {0:?}")]
    InvalidDurationFormat(String),
}

/// A single oracle record that could not be turned into a schedule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid schedule record for {address}: {reason}")]
pub struct RecordError {
    pub address: String,
    pub reason: String,
}

impl RecordError {
    pub fn new(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reason: reason.into(),
        }
    }
}

/// Failures talking to the external oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unreachable: {0}")]
    Unreachable(String),

    #[error("oracle request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("oracle payload could not be decoded: {0}")]
    Decode(String),

    #[error("invalid oracle url: {0}")]
    InvalidUrl(String),
}

/// Failures of the processed-marker store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("processed store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("processed store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Per-address activation preconditions. Never fatal for the block.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("account {0} not found")]
    AccountNotFound(Address),

    #[error("account {address} of kind {kind} cannot be converted")]
    NotConvertible { address: Address, kind: String },

    #[error("account {0} has no balance to lock")]
    ZeroBalance(Address),

    #[error("schedule for {address} is invalid: {reason}")]
    InvalidSchedule { address: Address, reason: String },

    #[error("public key of {0} could not be packed")]
    KeyPacking(Address),

    #[error("math overflow")]
    MathOverflow,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ActivationError {
    /// Whether retrying on a later block can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ActivationError::InvalidSchedule { .. })
    }
}

/// Transaction-level rejections raised by the admission guard.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error(
        "Vesting Error: {address} with {unvested}{denom} unvested, need at least {required}{denom}, \
         when doing transaction of {amount}{denom}, but account has {balance}{denom}."
    )]
    InsufficientUnvestedBalance {
        address: Address,
        denom: String,
        unvested: String,
        required: String,
        amount: String,
        balance: String,
    },

    #[error("Vesting Error: Address: {0} should not be in minting and vesting list")]
    MintingListConflict(Address),

    #[error("Vesting Error: math overflow")]
    MathOverflow,
}

/// Invalid configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures while assembling the module from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
