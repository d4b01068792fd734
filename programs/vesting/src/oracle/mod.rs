//! External schedule and minting-list oracle.

mod client;

pub use client::OracleClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::OracleError;
use crate::state::{Address, VestingSchedule};

/// Oracle's report of when vesting storage last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVersion {
    /// Vesting storage has never been written.
    Never,
    At(DateTime<Utc>),
    /// The source cannot tell; always fetch.
    Unknown,
}

#[async_trait]
pub trait ScheduleSource: Send + Sync + 'static {
    /// Validated schedules keyed by undecorated address. Invalid records are
    /// dropped by the source, not reported here. `None` when the source
    /// answered without a usable document (error status, empty body).
    async fn fetch_schedules(
        &self,
    ) -> Result<Option<BTreeMap<Address, VestingSchedule>>, OracleError>;

    async fn storage_version(&self) -> Result<StorageVersion, OracleError> {
        Ok(StorageVersion::Unknown)
    }
}

#[async_trait]
pub trait MintRegistry: Send + Sync + 'static {
    async fn is_minting(&self, address: &Address) -> Result<bool, OracleError>;
}
