//! Durable record of which addresses have been processed.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::state::{Address, ScheduleStatus};

pub trait ProcessedStore: Send + Sync {
    fn status(&self, address: &Address) -> Result<Option<ScheduleStatus>, StoreError>;

    fn record(&self, address: &Address, status: &ScheduleStatus) -> Result<(), StoreError>;

    fn all(&self) -> Result<BTreeMap<Address, ScheduleStatus>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryProcessedStore {
    inner: RwLock<BTreeMap<Address, ScheduleStatus>>,
}

impl ProcessedStore for MemoryProcessedStore {
    fn status(&self, address: &Address) -> Result<Option<ScheduleStatus>, StoreError> {
        Ok(self.inner.read().get(address).cloned())
    }

    fn record(&self, address: &Address, status: &ScheduleStatus) -> Result<(), StoreError> {
        self.inner.write().insert(address.clone(), status.clone());
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<Address, ScheduleStatus>, StoreError> {
        Ok(self.inner.read().clone())
    }
}

/// JSON snapshot on disk. Every write replaces the file through a sibling
/// temp file and a rename, so a crash leaves either the old or new snapshot.
#[derive(Debug)]
pub struct FileProcessedStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<Address, ScheduleStatus>>,
}

impl FileProcessedStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<Address, ScheduleStatus>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ProcessedStore for FileProcessedStore {
    fn status(&self, address: &Address) -> Result<Option<ScheduleStatus>, StoreError> {
        Ok(self.inner.lock().get(address).cloned())
    }

    fn record(&self, address: &Address, status: &ScheduleStatus) -> Result<(), StoreError> {
        let mut entries = self.inner.lock();
        let previous = entries.insert(address.clone(), status.clone());
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in step.
            match previous {
                Some(p) => entries.insert(address.clone(), p),
                None => entries.remove(address),
            };
            return Err(e);
        }
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<Address, ScheduleStatus>, StoreError> {
        Ok(self.inner.lock().clone())
    }
}
