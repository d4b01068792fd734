use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::ScheduleCache;
use crate::error::AdmissionError;
use crate::instructions::unvested::unvested_amount;
use crate::ledger::Ledger;
use crate::oracle::MintRegistry;
use crate::state::{Address, Coins, ScheduleStatus};
use crate::utils::amount::format_amount;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgSend {
    pub from: Address,
    pub to: Address,
    pub amount: Coins,
}

/// Transaction message as seen by the guard. Only sends are inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxMsg {
    Send(MsgSend),
    Other { type_url: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxFlags {
    /// Dry run; checked exactly like a real submission.
    pub simulate: bool,
    /// Re-validation of an already accepted transaction.
    pub recheck: bool,
}

/// Rejects sends that would dip into a sender's still-locked balance.
pub struct TransferGuard {
    cache: Arc<ScheduleCache>,
    minting: Arc<dyn MintRegistry>,
    denom: String,
    coin_power: u32,
    display_precision: u32,
}

impl TransferGuard {
    pub fn new(
        cache: Arc<ScheduleCache>,
        minting: Arc<dyn MintRegistry>,
        denom: impl Into<String>,
        coin_power: u32,
        display_precision: u32,
    ) -> Self {
        Self {
            cache,
            minting,
            denom: denom.into(),
            coin_power,
            display_precision,
        }
    }

    pub fn denom(&self) -> &str {
        &self.denom
    }

    /// Validate every send in `msgs` at block time `now`.
    ///
    /// Amounts of the governed denomination are summed per sender first, so
    /// splitting a transfer across messages does not bypass the check. On
    /// re-check only the minting-list conflict is evaluated.
    pub async fn check<L: Ledger>(
        &self,
        ledger: &L,
        msgs: &[TxMsg],
        flags: TxFlags,
        now: DateTime<Utc>,
    ) -> Result<(), AdmissionError> {
        for (sender, amount) in self.outgoing(msgs)? {
            let Some(schedule) = self.cache.get(&sender) else {
                continue;
            };
            if let ScheduleStatus::Rejected { reason } = &schedule.status {
                debug!(address = %sender, reason = %reason, "schedule was rejected, not enforcing");
                continue;
            }

            if self.is_minting(&sender).await {
                return Err(AdmissionError::MintingListConflict(sender));
            }
            if flags.recheck {
                continue;
            }

            let unvested = unvested_amount(&schedule, now);
            if unvested == 0 {
                continue;
            }
            let balance = ledger.balance(&sender, &self.denom);
            let required = unvested
                .checked_add(amount)
                .ok_or(AdmissionError::MathOverflow)?;
            if balance < required {
                debug!(
                    address = %sender,
                    unvested,
                    amount,
                    balance,
                    simulate = flags.simulate,
                    "transfer exceeds vested balance"
                );
                return Err(AdmissionError::InsufficientUnvestedBalance {
                    address: sender,
                    denom: self.denom.clone(),
                    unvested: self.render(unvested),
                    required: self.render(required),
                    amount: self.render(amount),
                    balance: self.render(balance),
                });
            }
        }
        Ok(())
    }

    /// Governed-denomination totals per sender; senders moving none of it
    /// are left out.
    fn outgoing(&self, msgs: &[TxMsg]) -> Result<BTreeMap<Address, u128>, AdmissionError> {
        let mut totals: BTreeMap<Address, u128> = BTreeMap::new();
        for msg in msgs {
            let TxMsg::Send(send) = msg else { continue };
            let amount = send.amount.amount_of(&self.denom);
            if amount == 0 {
                continue;
            }
            let total = totals.entry(send.from.clone()).or_default();
            *total = total
                .checked_add(amount)
                .ok_or(AdmissionError::MathOverflow)?;
        }
        Ok(totals)
    }

    async fn is_minting(&self, address: &Address) -> bool {
        match self.minting.is_minting(address).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(address = %address, error = %e, "minting list unavailable, treating as not listed");
                false
            }
        }
    }

    fn render(&self, value: u128) -> String {
        format_amount(value, self.coin_power, self.display_precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryProcessedStore;
    use crate::error::OracleError;
    use crate::ledger::MemoryLedger;
    use crate::state::VestingSchedule;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeMints {
        listed: HashSet<Address>,
        down: bool,
    }

    #[async_trait]
    impl MintRegistry for FakeMints {
        async fn is_minting(&self, address: &Address) -> Result<bool, OracleError> {
            if self.down {
                return Err(OracleError::Unreachable("refused".into()));
            }
            Ok(self.listed.contains(address))
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn four_minutes_in() -> DateTime<Utc> {
        start() + chrono::Duration::minutes(4)
    }

    fn guard_with(mints: FakeMints, coin_power: u32) -> (TransferGuard, MemoryLedger) {
        let cache = Arc::new(ScheduleCache::new(Arc::new(MemoryProcessedStore::default())));
        cache
            .upsert(VestingSchedule {
                address: Address::new("vester"),
                total_amount: 1_000,
                start_time: start(),
                duration: Duration::from_secs(600),
                parts_count: 10,
                cliff_parts: 0,
                tge_percent: 0,
                activation_block: 1,
                status: ScheduleStatus::Pending,
            })
            .unwrap();
        let mut ledger = MemoryLedger::new();
        ledger.set_balance(&Address::new("vester"), "ugd", 1_000);
        ledger.set_balance(&Address::new("free"), "ugd", 10);
        (
            TransferGuard::new(cache, Arc::new(mints), "ugd", coin_power, coin_power),
            ledger,
        )
    }

    fn send(from: &str, denom: &str, amount: u128) -> TxMsg {
        TxMsg::Send(MsgSend {
            from: Address::new(from),
            to: Address::new("recipient"),
            amount: Coins::single(denom, amount),
        })
    }

    #[tokio::test]
    async fn rejects_spending_into_unvested_balance() {
        let (guard, ledger) = guard_with(FakeMints::default(), 0);
        let err = guard
            .check(&ledger, &[send("vester", "ugd", 500)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Vesting Error: vester with 600ugd unvested, need at least 1100ugd, \
             when doing transaction of 500ugd, but account has 1000ugd."
        );

        guard
            .check(&ledger, &[send("vester", "ugd", 300)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap();
        guard
            .check(&ledger, &[send("vester", "ugd", 400)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sums_sends_from_the_same_sender() {
        let (guard, ledger) = guard_with(FakeMints::default(), 0);
        let msgs = [
            send("vester", "ugd", 300),
            TxMsg::Other {
                type_url: "/cosmos.staking.v1beta1.MsgDelegate".into(),
            },
            send("vester", "ugd", 200),
        ];
        let err = guard
            .check(&ledger, &msgs, TxFlags::default(), four_minutes_in())
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::InsufficientUnvestedBalance { .. }));
    }

    #[tokio::test]
    async fn renders_amounts_in_display_units() {
        let (guard, ledger) = guard_with(FakeMints::default(), 2);
        let err = guard
            .check(&ledger, &[send("vester", "ugd", 500)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap_err();
        let AdmissionError::InsufficientUnvestedBalance { unvested, required, amount, balance, .. } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(
            (unvested.as_str(), required.as_str(), amount.as_str(), balance.as_str()),
            ("6.00", "11.00", "5.00", "10.00")
        );
    }

    #[tokio::test]
    async fn out_of_scope_transfers_pass() {
        let (guard, ledger) = guard_with(FakeMints::default(), 0);
        let now = four_minutes_in();
        // other denomination
        guard
            .check(&ledger, &[send("vester", "uatom", 5_000)], TxFlags::default(), now)
            .await
            .unwrap();
        // no schedule
        guard
            .check(&ledger, &[send("free", "ugd", 5_000)], TxFlags::default(), now)
            .await
            .unwrap();
        // before start and after the end nothing is locked
        guard
            .check(&ledger, &[send("vester", "ugd", 900)], TxFlags::default(), start())
            .await
            .unwrap();
        guard
            .check(
                &ledger,
                &[send("vester", "ugd", 900)],
                TxFlags::default(),
                start() + chrono::Duration::minutes(10),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recheck_skips_balance_math_only() {
        let recheck = TxFlags {
            recheck: true,
            ..TxFlags::default()
        };
        let (guard, ledger) = guard_with(FakeMints::default(), 0);
        guard
            .check(&ledger, &[send("vester", "ugd", 900)], recheck, four_minutes_in())
            .await
            .unwrap();

        let mints = FakeMints {
            listed: [Address::new("vester")].into_iter().collect(),
            down: false,
        };
        let (guard, ledger) = guard_with(mints, 0);
        assert_eq!(
            guard
                .check(&ledger, &[send("vester", "ugd", 1)], recheck, four_minutes_in())
                .await,
            Err(AdmissionError::MintingListConflict(Address::new("vester")))
        );
    }

    #[tokio::test]
    async fn minting_conflict_rejects_regardless_of_balance() {
        let mints = FakeMints {
            listed: [Address::new("vester")].into_iter().collect(),
            down: false,
        };
        let (guard, ledger) = guard_with(mints, 0);
        let err = guard
            .check(&ledger, &[send("vester", "ugd", 1)], TxFlags::default(), start())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Vesting Error: Address: vester should not be in minting and vesting list"
        );
    }

    #[tokio::test]
    async fn unavailable_minting_list_is_not_a_conflict() {
        let mints = FakeMints {
            down: true,
            ..FakeMints::default()
        };
        let (guard, ledger) = guard_with(mints, 0);
        guard
            .check(&ledger, &[send("vester", "ugd", 300)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_schedules_are_not_enforced() {
        let (guard, ledger) = guard_with(FakeMints::default(), 0);
        guard
            .cache
            .mark_processed(
                &Address::new("vester"),
                ScheduleStatus::Rejected { reason: "parts".into() },
            )
            .unwrap();
        guard
            .check(&ledger, &[send("vester", "ugd", 900)], TxFlags::default(), four_minutes_in())
            .await
            .unwrap();
    }
}
