//! Background refresh of the schedule cache from a [`ScheduleSource`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ScheduleCache;
use crate::error::OracleError;
use crate::oracle::{ScheduleSource, StorageVersion};

/// Outcome of one refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub already_processed: usize,
    pub failed: usize,
    /// Nothing was fetched: another refresh was running or the source
    /// reported no change since the last one.
    pub skipped: bool,
    /// The source answered without a usable document; the cache and the
    /// remembered storage version were left alone.
    pub degraded: bool,
}

impl RefreshStats {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ScheduleRefresher {
    cache: Arc<ScheduleCache>,
    source: Arc<dyn ScheduleSource>,
    interval: Duration,
    change_detection: bool,
    last_seen: Mutex<Option<StorageVersion>>,
    in_flight: tokio::sync::Mutex<()>,
    task: Mutex<Option<RefreshTask>>,
}

impl ScheduleRefresher {
    pub fn new(
        cache: Arc<ScheduleCache>,
        source: Arc<dyn ScheduleSource>,
        interval: Duration,
        change_detection: bool,
    ) -> Self {
        Self {
            cache,
            source,
            interval,
            change_detection,
            last_seen: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch once and merge into the cache. On error the cache is left as
    /// it was. Overlapping calls return a skipped result immediately.
    pub async fn refresh_once(&self) -> Result<RefreshStats, OracleError> {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            debug!("refresh already in flight, skipping");
            return Ok(RefreshStats::skipped());
        };

        let version = if self.change_detection {
            match self.source.storage_version().await {
                Ok(StorageVersion::Unknown) => None,
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "could not read storage version, fetching anyway");
                    None
                }
            }
        } else {
            None
        };
        if let Some(v) = version {
            let unchanged = { *self.last_seen.lock() == Some(v) };
            if unchanged {
                debug!(version = ?v, "vesting storage unchanged");
                return Ok(RefreshStats::skipped());
            }
        }

        let Some(batch) = self.source.fetch_schedules().await? else {
            warn!("oracle returned no schedule document, retrying next tick");
            return Ok(RefreshStats {
                degraded: true,
                ..RefreshStats::default()
            });
        };
        let stats = self.cache.apply(batch);
        if version.is_some() {
            *self.last_seen.lock() = version;
        }
        info!(
            fetched = stats.fetched,
            inserted = stats.inserted,
            updated = stats.updated,
            cached = self.cache.len(),
            "vesting schedules refreshed"
        );
        Ok(stats)
    }

    /// Spawn the periodic loop on `runtime`. Returns `false` if one is
    /// already running.
    pub fn start(self: &Arc<Self>, runtime: &Handle) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(Arc::clone(self).run(cancel.clone()));
        *task = Some(RefreshTask { cancel, handle });
        info!(interval = ?self.interval, "schedule refresher started");
        true
    }

    /// Fire a single refresh in the background without waiting for it.
    pub fn trigger(self: &Arc<Self>, runtime: &Handle) {
        let this = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = this.refresh_once().await {
                warn!(error = %e, "on-demand refresh failed, keeping cached schedules");
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(RefreshTask { cancel, handle }) = task else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            if e.is_panic() {
                warn!(error = %e, "schedule refresher panicked");
            }
        }
        info!("schedule refresher stopped");
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.refresh_once() => {
                    if let Err(e) = res {
                        warn!(error = %e, "schedule refresh failed, keeping cached schedules");
                    }
                }
            }
        }
    }
}
