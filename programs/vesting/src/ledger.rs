//! Narrow view of the host ledger's account and bank storage.

use std::collections::HashMap;

use crate::state::{AccountState, Address, Coins};

pub trait Ledger {
    fn account(&self, address: &Address) -> Option<AccountState>;

    fn set_account(&mut self, account: AccountState);

    fn all_balances(&self, address: &Address) -> Coins;

    fn balance(&self, address: &Address, denom: &str) -> u128 {
        self.all_balances(address).amount_of(denom)
    }
}

/// In-memory ledger for embedding hosts without their own store, and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    accounts: HashMap<Address, AccountState>,
    balances: HashMap<Address, Coins>,
    account_writes: u64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&mut self, account: AccountState) {
        self.accounts.insert(account.address().clone(), account);
    }

    pub fn set_balance(&mut self, address: &Address, denom: &str, amount: u128) {
        self.balances
            .entry(address.clone())
            .or_default()
            .set(denom, amount);
    }

    /// Number of `set_account` calls made through the trait.
    pub fn account_writes(&self) -> u64 {
        self.account_writes
    }
}

impl Ledger for MemoryLedger {
    fn account(&self, address: &Address) -> Option<AccountState> {
        self.accounts.get(address).cloned()
    }

    fn set_account(&mut self, account: AccountState) {
        self.account_writes += 1;
        self.insert_account(account);
    }

    fn all_balances(&self, address: &Address) -> Coins {
        self.balances.get(address).cloned().unwrap_or_default()
    }
}
