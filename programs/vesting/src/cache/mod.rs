//! Fetched schedules awaiting (or past) activation.
//!
//! - Reads (`get`, `has`) share a reader/writer lock with the refresh path.
//! - A processed entry is never overwritten by later oracle data.
//! - The activation pass and the refresh apply step also serialize on a
//!   separate pass lock, so a refresh cannot land mid-activation.

pub mod refresh;
pub mod store;

pub use refresh::{RefreshStats, ScheduleRefresher};
pub use store::{FileProcessedStore, MemoryProcessedStore, ProcessedStore};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::instructions::ActivationPolicy;
use crate::state::{Address, ScheduleStatus, VestingSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    AlreadyProcessed,
}

struct Entry {
    schedule: VestingSchedule,
    digest: [u8; 32],
}

pub struct ScheduleCache {
    entries: RwLock<HashMap<Address, Entry>>,
    pass: Mutex<()>,
    store: Arc<dyn ProcessedStore>,
}

impl ScheduleCache {
    pub fn new(store: Arc<dyn ProcessedStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            pass: Mutex::new(()),
            store,
        }
    }

    /// Insert or refresh a pending schedule. Addresses already processed,
    /// in memory or in the durable store, keep their recorded status.
    pub fn upsert(&self, mut schedule: VestingSchedule) -> Result<UpsertOutcome, StoreError> {
        let digest = schedule.digest();
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get_mut(&schedule.address) {
            if existing.schedule.processed() {
                if existing.digest != digest {
                    warn!(
                        address = %schedule.address,
                        "processed schedule changed upstream, ignoring"
                    );
                }
                return Ok(UpsertOutcome::AlreadyProcessed);
            }
            if existing.digest == digest {
                return Ok(UpsertOutcome::Unchanged);
            }
            schedule.status = ScheduleStatus::Pending;
            *existing = Entry { schedule, digest };
            return Ok(UpsertOutcome::Updated);
        }

        let outcome = match self.store.status(&schedule.address)? {
            Some(status) if status.is_processed() => {
                schedule.status = status;
                UpsertOutcome::AlreadyProcessed
            }
            _ => {
                schedule.status = ScheduleStatus::Pending;
                UpsertOutcome::Inserted
            }
        };
        entries.insert(schedule.address.clone(), Entry { schedule, digest });
        Ok(outcome)
    }

    pub fn get(&self, address: &Address) -> Option<VestingSchedule> {
        self.entries.read().get(address).map(|e| e.schedule.clone())
    }

    pub fn has(&self, address: &Address) -> bool {
        self.entries.read().contains_key(address)
    }

    pub fn is_processed(&self, address: &Address) -> bool {
        self.entries
            .read()
            .get(address)
            .is_some_and(|e| e.schedule.processed())
    }

    /// Flip `address` to a processed `status`. Monotonic: a processed entry
    /// keeps its first status and `Pending` is ignored.
    ///
    /// The durable marker is written before the in-memory flip and without
    /// holding the entries lock, so readers are not stalled by store I/O.
    /// Writers are expected to hold the pass lock.
    pub fn mark_processed(&self, address: &Address, status: ScheduleStatus) -> Result<(), StoreError> {
        if !status.is_processed() || self.is_processed(address) {
            return Ok(());
        }
        self.store.record(address, &status)?;
        if let Some(entry) = self.entries.write().get_mut(address) {
            if !entry.schedule.processed() {
                entry.schedule.status = status;
            }
        }
        Ok(())
    }

    /// Pending schedules due at `height`, ordered by address.
    pub fn due(&self, height: u64, policy: ActivationPolicy) -> Vec<VestingSchedule> {
        let mut due: Vec<VestingSchedule> = self
            .entries
            .read()
            .values()
            .filter(|e| !e.schedule.processed())
            .filter(|e| policy.is_due(e.schedule.activation_block, height))
            .map(|e| e.schedule.clone())
            .collect();
        due.sort_by(|a, b| a.address.cmp(&b.address));
        due
    }

    /// Held for a whole activation pass or refresh apply step.
    pub fn lock_pass(&self) -> MutexGuard<'_, ()> {
        self.pass.lock()
    }

    /// Upsert a fetched batch under the pass lock. Store failures skip only
    /// the affected address.
    pub fn apply(&self, batch: BTreeMap<Address, VestingSchedule>) -> RefreshStats {
        let _pass = self.lock_pass();
        let mut stats = RefreshStats {
            fetched: batch.len(),
            ..RefreshStats::default()
        };
        for (address, schedule) in batch {
            match self.upsert(schedule) {
                Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
                Ok(UpsertOutcome::Updated) => stats.updated += 1,
                Ok(UpsertOutcome::Unchanged) => stats.unchanged += 1,
                Ok(UpsertOutcome::AlreadyProcessed) => stats.already_processed += 1,
                Err(e) => {
                    warn!(address = %address, error = %e, "could not cache schedule");
                    stats.failed += 1;
                }
            }
        }
        debug!(?stats, "applied oracle batch");
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
