use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::ScheduleCache;
use crate::constants::{MIN_PERIOD_SECONDS, PERCENT_DENOMINATOR};
use crate::error::ActivationError;
use crate::ledger::Ledger;
use crate::state::{
    AccountState, Address, BaseAccount, Coins, PeriodicVestingAccount, ScheduleStatus,
    VestingPeriod, VestingSchedule,
};

/// Which cached schedules a pass considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationPolicy {
    /// Only schedules whose activation block equals the current height.
    #[default]
    AtHeight,
    /// Every pending schedule whose activation block has been reached.
    Continuous,
}

impl ActivationPolicy {
    pub fn is_due(self, activation_block: u64, height: u64) -> bool {
        match self {
            ActivationPolicy::AtHeight => activation_block == height,
            ActivationPolicy::Continuous => activation_block <= height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub address: Address,
    pub periods: usize,
    /// blake3 over the generated period plan.
    pub receipt: [u8; 32],
}

#[derive(Debug, Default)]
pub struct ActivationReport {
    pub activated: Vec<Activation>,
    /// Already periodic-vesting accounts, marked processed without conversion.
    pub already_vesting: Vec<Address>,
    pub rejected: Vec<Address>,
    /// Retried on a later pass.
    pub skipped: Vec<(Address, ActivationError)>,
}

enum Outcome {
    Converted(Activation),
    AlreadyVesting,
}

/// Fixed-layout digest input for one (period, denomination) entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PeriodRecord {
    index: u32,
    _padding: [u8; 4],
    length_seconds: u64,
    amount: [u8; 16],
}

/// Converts plain accounts into periodic-vesting accounts once their
/// schedule comes due.
pub struct ActivationEngine {
    cache: Arc<ScheduleCache>,
    policy: ActivationPolicy,
}

impl ActivationEngine {
    pub fn new(cache: Arc<ScheduleCache>, policy: ActivationPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    /// Run one pass for `block`. Per-address failures are isolated.
    pub fn activate_due<L: Ledger>(&self, ledger: &mut L, block: BlockInfo) -> ActivationReport {
        let _pass = self.cache.lock_pass();
        let mut report = ActivationReport::default();

        for schedule in self.cache.due(block.height, self.policy) {
            let address = schedule.address.clone();
            match activate_one(ledger, &schedule, block) {
                Ok(Outcome::Converted(activation)) => {
                    info!(
                        address = %address,
                        height = block.height,
                        periods = activation.periods,
                        receipt = %blake3::Hash::from(activation.receipt).to_hex(),
                        "converted account to periodic vesting"
                    );
                    self.mark(&address, ScheduleStatus::Activated { height: block.height });
                    report.activated.push(activation);
                }
                Ok(Outcome::AlreadyVesting) => {
                    debug!(address = %address, "account already vesting, marking processed");
                    self.mark(&address, ScheduleStatus::Activated { height: block.height });
                    report.already_vesting.push(address);
                }
                Err(e) if e.is_permanent() => {
                    warn!(address = %address, error = %e, "rejecting schedule");
                    self.mark(&address, ScheduleStatus::Rejected { reason: e.to_string() });
                    report.rejected.push(address);
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "skipping activation");
                    report.skipped.push((address, e));
                }
            }
        }
        report
    }

    fn mark(&self, address: &Address, status: ScheduleStatus) {
        // A failed write is recovered on the next pass: the account is
        // already periodic-vesting and gets re-marked there.
        if let Err(e) = self.cache.mark_processed(address, status) {
            error!(address = %address, error = %e, "failed to record processed schedule");
        }
    }
}

fn activate_one<L: Ledger>(
    ledger: &mut L,
    schedule: &VestingSchedule,
    block: BlockInfo,
) -> Result<Outcome, ActivationError> {
    let address = &schedule.address;
    schedule
        .check_shape()
        .map_err(|reason| ActivationError::InvalidSchedule {
            address: address.clone(),
            reason,
        })?;

    let account = ledger
        .account(address)
        .ok_or_else(|| ActivationError::AccountNotFound(address.clone()))?;
    let base = match account {
        AccountState::PeriodicVesting(_) => return Ok(Outcome::AlreadyVesting),
        AccountState::Simple(base) => base,
        AccountState::DelayedVesting(delayed) => delayed.base,
        other @ AccountState::Other { .. } => {
            return Err(ActivationError::NotConvertible {
                address: address.clone(),
                kind: other.kind().to_owned(),
            })
        }
    };

    let balances = ledger.all_balances(address);
    if balances.is_zero() {
        return Err(ActivationError::ZeroBalance(address.clone()));
    }

    let periods = plan_periods(&balances, schedule)?;

    let pub_key = match &base.pub_key {
        Some(k) => Some(
            k.pack()
                .ok_or_else(|| ActivationError::KeyPacking(address.clone()))?,
        ),
        None => None,
    };
    let base = BaseAccount { pub_key, ..base };

    let receipt = receipt_digest(address, &periods);
    let count = periods.len();
    let vesting = PeriodicVestingAccount::new(base, balances, block.time.timestamp(), periods)
        .ok_or(ActivationError::MathOverflow)?;
    ledger.set_account(AccountState::PeriodicVesting(vesting));

    Ok(Outcome::Converted(Activation {
        address: address.clone(),
        periods: count,
        receipt,
    }))
}

/// Split `balances` into `parts_count` periods: one TGE tranche, `cliff_parts`
/// empty periods, then `parts_count - cliff_parts - 1` equal linear periods.
/// The same linear count is the per-period divisor. Any division remainder
/// is added to the last period so every denomination sums back exactly.
pub fn plan_periods(
    balances: &Coins,
    schedule: &VestingSchedule,
) -> Result<Vec<VestingPeriod>, ActivationError> {
    let invalid = |reason: String| ActivationError::InvalidSchedule {
        address: schedule.address.clone(),
        reason,
    };
    schedule.check_shape().map_err(invalid)?;

    let parts = schedule.parts_count as usize;
    let cliff = schedule.cliff_parts as usize;
    let linear = parts - cliff - 1;
    let percent = u128::from(schedule.tge_percent);
    let length_seconds = (schedule.duration.as_secs() / u64::from(schedule.parts_count))
        .max(MIN_PERIOD_SECONDS);

    let mut periods: Vec<VestingPeriod> = (0..parts)
        .map(|_| VestingPeriod {
            length_seconds,
            amount: Coins::new(),
        })
        .collect();

    for (denom, balance) in balances.iter() {
        // floor(balance * percent / 100) without overflowing the product.
        let tge = (balance / PERCENT_DENOMINATOR) * percent
            + (balance % PERCENT_DENOMINATOR) * percent / PERCENT_DENOMINATOR;
        let remaining = balance - tge;
        let per_period = if linear > 0 {
            remaining / linear as u128
        } else {
            0
        };

        periods[0].amount.set(denom, tge);
        let mut sum = tge;
        for period in periods.iter_mut().skip(1 + cliff) {
            period.amount.set(denom, per_period);
            sum = sum
                .checked_add(per_period)
                .ok_or(ActivationError::MathOverflow)?;
        }

        let difference = balance
            .checked_sub(sum)
            .ok_or(ActivationError::MathOverflow)?;
        if difference > 0 {
            periods
                .last_mut()
                .ok_or(ActivationError::MathOverflow)?
                .amount
                .checked_add(denom, difference)
                .ok_or(ActivationError::MathOverflow)?;
        }
    }

    Ok(periods)
}

fn receipt_digest(address: &Address, periods: &[VestingPeriod]) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(address.as_str().as_bytes());
    for (index, period) in periods.iter().enumerate() {
        let mut record = PeriodRecord {
            index: index as u32,
            _padding: [0u8; 4],
            length_seconds: period.length_seconds,
            amount: [0u8; 16],
        };
        if period.amount.is_zero() {
            h.update(bytemuck::bytes_of(&record));
            continue;
        }
        for (denom, amount) in period.amount.iter() {
            record.amount = amount.to_le_bytes();
            h.update(denom.as_bytes());
            h.update(&[0u8]);
            h.update(bytemuck::bytes_of(&record));
        }
    }
    *h.finalize().as_bytes()
}
