//! Crate-wide constants and configuration defaults.

use std::time::Duration;

/// Interval between oracle pulls by the background refresh task.
pub const CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a single oracle round-trip.
pub const ORACLE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Decoration the oracle wraps around every address key.
pub const ADDRESS_WRAPPER_PREFIX: &str = "Address(wif=";
pub const ADDRESS_WRAPPER_SUFFIX: &str = ")";

/// Oracle path serving the address -> schedule document.
pub const VESTING_STORAGE_PATH: &str = "vesting-storage";

/// Oracle path prefix for minting-list lookups (`<base>/mint-storage/<addr>`).
pub const MINT_STORAGE_PATH: &str = "mint-storage";

/// Value of `lastchanged` when the oracle has never written vesting storage.
pub const NEVER_CHANGED: &str = "never";

/// Denomination governed by default.
pub const DEFAULT_DENOM: &str = "ugd";

/// Decimal places between the base unit and the display unit.
pub const DEFAULT_COIN_POWER: u32 = 18;

/// Largest scale whose power of ten still fits in a u128.
pub const MAX_COIN_POWER: u32 = 38;

/// TGE percentage denominator.
pub const PERCENT_DENOMINATOR: u128 = 100;

/// Shortest period length emitted into a vesting account (seconds).
pub const MIN_PERIOD_SECONDS: u64 = 1;
