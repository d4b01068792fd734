//! Oracle-fed vesting for a host ledger.
//!
//! Schedules are pulled from an external oracle into a [`cache::ScheduleCache`],
//! plain accounts are converted into periodic-vesting accounts when their
//! activation block arrives, and outgoing transfers are refused while they
//! would spend still-locked funds.

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod instructions;
pub mod ledger;
pub mod module;
pub mod oracle;
pub mod state;
pub mod utils;

pub use config::VestingConfig;
pub use error::*;
pub use instructions::*;
pub use ledger::{Ledger, MemoryLedger};
pub use module::VestingModule;
