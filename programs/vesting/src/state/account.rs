use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::Address;

/// Multi-denomination amount. Zero entries are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(BTreeMap<String, u128>);

impl Coins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(denom: impl Into<String>, amount: u128) -> Self {
        let mut c = Self::new();
        c.set(denom, amount);
        c
    }

    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0.get(denom).copied().unwrap_or(0)
    }

    pub fn set(&mut self, denom: impl Into<String>, amount: u128) {
        let denom = denom.into();
        if amount == 0 {
            self.0.remove(&denom);
        } else {
            self.0.insert(denom, amount);
        }
    }

    /// Adds `amount` of `denom`; `None` on overflow.
    pub fn checked_add(&mut self, denom: &str, amount: u128) -> Option<()> {
        let next = self.amount_of(denom).checked_add(amount)?;
        self.set(denom, next);
        Some(())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn denoms(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u128)> {
        self.0.iter().map(|(d, a)| (d.as_str(), *a))
    }
}

impl<S: Into<String>> FromIterator<(S, u128)> for Coins {
    fn from_iter<I: IntoIterator<Item = (S, u128)>>(iter: I) -> Self {
        let mut c = Coins::new();
        for (d, a) in iter {
            c.set(d, a);
        }
        c
    }
}

/// One step of a periodic vesting account: `amount` unlocks `length_seconds`
/// after the previous step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingPeriod {
    pub length_seconds: u64,
    pub amount: Coins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgo {
    Secp256k1,
    Ed25519,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub algo: KeyAlgo,
    pub bytes: Vec<u8>,
}

impl PublicKey {
    /// Re-encode for the replacement account. Fails on material that does
    /// not match its algorithm's length.
    pub fn pack(&self) -> Option<PublicKey> {
        let expected = match self.algo {
            KeyAlgo::Secp256k1 => 33,
            KeyAlgo::Ed25519 => 32,
        };
        (self.bytes.len() == expected).then(|| self.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseAccount {
    pub address: Address,
    pub pub_key: Option<PublicKey>,
    pub account_number: u64,
    pub sequence: u64,
}

impl BaseAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            pub_key: None,
            account_number: 0,
            sequence: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedVestingAccount {
    pub base: BaseAccount,
    pub original_vesting: Coins,
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicVestingAccount {
    pub base: BaseAccount,
    pub original_vesting: Coins,
    pub start_time: i64,
    pub end_time: i64,
    pub periods: Vec<VestingPeriod>,
}

impl PeriodicVestingAccount {
    /// `end_time` is derived from the sum of period lengths; `None` on overflow.
    pub fn new(
        base: BaseAccount,
        original_vesting: Coins,
        start_time: i64,
        periods: Vec<VestingPeriod>,
    ) -> Option<Self> {
        let mut end_time = start_time;
        for p in &periods {
            end_time = end_time.checked_add(i64::try_from(p.length_seconds).ok()?)?;
        }
        Some(Self {
            base,
            original_vesting,
            start_time,
            end_time,
            periods,
        })
    }
}

/// Closed set of account shapes the host exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    Simple(BaseAccount),
    DelayedVesting(DelayedVestingAccount),
    PeriodicVesting(PeriodicVestingAccount),
    Other { base: BaseAccount, kind: String },
}

impl AccountState {
    pub fn base(&self) -> &BaseAccount {
        match self {
            AccountState::Simple(b) => b,
            AccountState::DelayedVesting(a) => &a.base,
            AccountState::PeriodicVesting(a) => &a.base,
            AccountState::Other { base, .. } => base,
        }
    }

    pub fn address(&self) -> &Address {
        &self.base().address
    }

    pub fn kind(&self) -> &str {
        match self {
            AccountState::Simple(_) => "simple",
            AccountState::DelayedVesting(_) => "delayed-vesting",
            AccountState::PeriodicVesting(_) => "periodic-vesting",
            AccountState::Other { kind, .. } => kind,
        }
    }
}
