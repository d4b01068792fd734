//! Host-facing assembly: one cache shared by the block hook and the
//! transaction-validation hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::cache::{
    FileProcessedStore, MemoryProcessedStore, ProcessedStore, RefreshStats, ScheduleCache,
    ScheduleRefresher,
};
use crate::config::VestingConfig;
use crate::error::{AdmissionError, OracleError, SetupError};
use crate::instructions::{ActivationEngine, ActivationReport, BlockInfo, TransferGuard, TxFlags, TxMsg};
use crate::ledger::Ledger;
use crate::oracle::{MintRegistry, OracleClient, ScheduleSource};

pub struct VestingModule {
    config: VestingConfig,
    cache: Arc<ScheduleCache>,
    refresher: Arc<ScheduleRefresher>,
    engine: ActivationEngine,
    guard: TransferGuard,
    runtime: Handle,
    started: AtomicBool,
}

impl VestingModule {
    pub fn new(
        config: VestingConfig,
        source: Arc<dyn ScheduleSource>,
        minting: Arc<dyn MintRegistry>,
        store: Arc<dyn ProcessedStore>,
        runtime: Handle,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let cache = Arc::new(ScheduleCache::new(store));
        let refresher = Arc::new(ScheduleRefresher::new(
            cache.clone(),
            source,
            config.refresh_interval(),
            config.change_detection,
        ));
        let engine = ActivationEngine::new(cache.clone(), config.activation_policy);
        let guard = TransferGuard::new(
            cache.clone(),
            minting,
            config.denom.clone(),
            config.coin_power,
            config.display_precision,
        );
        Ok(Self {
            config,
            cache,
            refresher,
            engine,
            guard,
            runtime,
            started: AtomicBool::new(false),
        })
    }

    /// Wire the HTTP oracle and the configured processed store.
    pub fn from_config(config: VestingConfig, runtime: Handle) -> Result<Self, SetupError> {
        config.validate()?;
        let oracle = Arc::new(OracleClient::from_config(&config)?);
        let store: Arc<dyn ProcessedStore> = match &config.processed_store_path {
            Some(path) => Arc::new(FileProcessedStore::open(path)?),
            None => Arc::new(MemoryProcessedStore::default()),
        };
        info!(
            oracle = oracle.base_url(),
            denom = %config.denom,
            policy = ?config.activation_policy,
            "vesting module configured"
        );
        Self::new(config, oracle.clone(), oracle, store, runtime)
    }

    /// Start the background refresh. Only the first call has any effect.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.refresher.start(&self.runtime)
    }

    /// Stop the background refresh and wait for it to exit.
    pub async fn stop(&self) {
        self.refresher.stop().await;
    }

    /// Block hook: starts the refresher on first use, triggers the
    /// block-driven refresh, then runs one activation pass.
    pub fn begin_block<L: Ledger>(&self, ledger: &mut L, block: BlockInfo) -> ActivationReport {
        self.start();
        let every = self.config.refresh_every_blocks;
        if every > 0 && block.height % every == 0 {
            debug!(height = block.height, "block-driven schedule refresh");
            self.refresher.trigger(&self.runtime);
        }

        let report = self.engine.activate_due(ledger, block);
        if !report.activated.is_empty() || !report.rejected.is_empty() {
            info!(
                height = block.height,
                activated = report.activated.len(),
                rejected = report.rejected.len(),
                skipped = report.skipped.len(),
                "vesting activation pass"
            );
        }
        report
    }

    /// Transaction-validation hook.
    pub async fn validate_tx<L: Ledger>(
        &self,
        ledger: &L,
        msgs: &[TxMsg],
        flags: TxFlags,
        now: DateTime<Utc>,
    ) -> Result<(), AdmissionError> {
        self.guard.check(ledger, msgs, flags, now).await
    }

    /// Refresh the cache now, outside the timer.
    pub async fn refresh_now(&self) -> Result<RefreshStats, OracleError> {
        self.refresher.refresh_once().await
    }

    pub fn cache(&self) -> &Arc<ScheduleCache> {
        &self.cache
    }

    pub fn config(&self) -> &VestingConfig {
        &self.config
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresher.is_running()
    }
}
