//! Sentinel Worker - Main scanning loop
//!
//! One scan walks the confirmed range `(cursor, head - (confirmations - 1)]`
//! oldest first, credits every matched transfer of a block, then persists
//! the block height as the new cursor. Ticks that arrive while a scan is
//! running are dropped.

use super::config::SentinelConfig;
use super::cursor::CursorStore;
use super::error::{ScannerError, SentinelError};
use super::scanner::{
    ChainBlock, ChainReader, DEFAULT_TOKEN_DECIMALS, DepositSource, DetectedDeposit, TransferLog,
};
use crate::account::index::AddressIndex;
use crate::account::validation::EvmAddress;
use crate::funding::deposit::{CreditRequest, DepositError, DepositService};
use crate::funding::ledger::{Ledger, MetadataStore};
use crate::money::NATIVE_DECIMALS;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, sleep};
use tracing::{debug, error, info, warn};

/// Delay before the first scan after start-up
const STARTUP_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Summary of one scan cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub head: u64,
    pub target: u64,
    /// Cursor when the scan started (after clamping to the start floor)
    pub start_cursor: u64,
    /// Cursor when the scan ended
    pub cursor: u64,
    pub blocks_processed: u64,
    pub blocks_skipped: u64,
    pub deposits_credited: u64,
    /// Credits refused by a lock or uniqueness conflict and not retried
    pub deposits_conflicted: u64,
    /// Height the scan stopped at without advancing the cursor
    pub halted_at: Option<u64>,
}

#[derive(Default)]
struct Tally {
    credited: u64,
    conflicted: u64,
}

impl Tally {
    fn add(&mut self, credit: Credit) {
        match credit {
            Credit::Applied => self.credited += 1,
            Credit::Conflict => self.conflicted += 1,
            Credit::NotApplied => {}
        }
    }
}

enum Credit {
    Applied,
    /// Lock or uniqueness conflict: already credited or transient
    Conflict,
    NotApplied,
}

enum BlockOutcome {
    Processed(Tally),
    Skipped,
    Halted,
}

/// Clears the scanning flag when the scan ends, however it ends
struct ScanGuard(Arc<AtomicBool>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Deposit reconciliation engine
pub struct SentinelWorker {
    reader: Arc<dyn ChainReader>,
    index: Arc<dyn AddressIndex>,
    deposits: DepositService,
    cursor: CursorStore,
    config: SentinelConfig,
    accepted_tokens: HashSet<EvmAddress>,
    decimals_cache: Mutex<HashMap<EvmAddress, u32>>,
    scanning: Arc<AtomicBool>,
}

impl SentinelWorker {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        index: Arc<dyn AddressIndex>,
        ledger: Arc<dyn Ledger>,
        metadata: Arc<dyn MetadataStore>,
        config: SentinelConfig,
    ) -> Result<Self, SentinelError> {
        config.validate()?;
        let accepted_tokens = config.accepted_token_set()?;

        Ok(Self {
            reader,
            index,
            deposits: DepositService::new(ledger),
            cursor: CursorStore::new(metadata),
            config,
            accepted_tokens,
            decimals_cache: Mutex::new(HashMap::new()),
            scanning: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        if self.scanning.load(Ordering::Acquire) {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    /// Idle -> Scanning, or `None` if a scan is already running
    fn begin_scan(&self) -> Option<ScanGuard> {
        self.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard(Arc::clone(&self.scanning)))
    }

    /// Run one scan unless one is already in progress
    ///
    /// Returns `None` when the tick was dropped.
    pub async fn tick(&self) -> Option<Result<ScanReport, SentinelError>> {
        let _guard = self.begin_scan()?;
        Some(self.scan_once().await)
    }

    /// Periodic scheduler; returns once `shutdown` flips to true
    ///
    /// Each tick runs its scan on a separate task so a slow scan never
    /// delays the timer. An in-flight scan is awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Sentinel starting: confirmations={}, poll interval {:?}, batch size {}",
            self.config.confirmations,
            self.config.poll_interval(),
            self.config.max_blocks_per_batch
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + STARTUP_DELAY, self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(guard) = self.begin_scan() else {
                        debug!("Previous scan still running, dropping tick");
                        continue;
                    };
                    let worker = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        worker.log_cycle(worker.scan_once().await);
                    }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!("Scan task ended abnormally: {}", e);
            }
        }
        info!("Sentinel stopped");
    }

    fn log_cycle(&self, result: Result<ScanReport, SentinelError>) {
        match result {
            Ok(report) if report.halted_at.is_some() => warn!(
                "Scan halted at block {:?}; cursor stays at {}",
                report.halted_at, report.cursor
            ),
            Ok(report) if report.cursor > report.start_cursor => info!(
                "Scanned blocks {}..={} (head {}): {} credited, {} conflicted, {} skipped",
                report.start_cursor + 1,
                report.cursor,
                report.head,
                report.deposits_credited,
                report.deposits_conflicted,
                report.blocks_skipped
            ),
            Ok(report) => debug!(
                "No new confirmed blocks (cursor {}, target {})",
                report.cursor, report.target
            ),
            Err(e) => error!("Scan cycle failed: {}", e),
        }
    }

    /// Scan body; callers go through [`tick`](Self::tick) or [`run`](Self::run)
    /// to get the single-flight guarantee
    async fn scan_once(&self) -> Result<ScanReport, SentinelError> {
        let head = self.reader.get_head_height().await?;
        let target = self.config.target_height(head);

        let mut cursor = self.cursor.load().await?;
        if cursor < self.config.min_start_height {
            info!(
                "Cursor {} below start height, moving to {}",
                cursor, self.config.min_start_height
            );
            cursor = self.config.min_start_height;
            self.cursor.save(cursor).await?;
        }

        let mut report = ScanReport {
            head,
            target,
            start_cursor: cursor,
            cursor,
            blocks_processed: 0,
            blocks_skipped: 0,
            deposits_credited: 0,
            deposits_conflicted: 0,
            halted_at: None,
        };

        if cursor >= target {
            return Ok(report);
        }

        debug!("Processing blocks {} to {}", cursor + 1, target);

        let batch = self.config.max_blocks_per_batch.max(1);
        let mut start = cursor + 1;
        while start <= target {
            let end = start.saturating_add(batch - 1).min(target);

            for height in start..=end {
                match self.process_block(height).await {
                    BlockOutcome::Processed(tally) => {
                        report.blocks_processed += 1;
                        report.deposits_credited += tally.credited;
                        report.deposits_conflicted += tally.conflicted;
                    }
                    BlockOutcome::Skipped => report.blocks_skipped += 1,
                    BlockOutcome::Halted => {
                        report.halted_at = Some(height);
                        return Ok(report);
                    }
                }
                self.cursor.save(height).await?;
                report.cursor = height;
            }

            start = end + 1;
            if start <= target && !self.config.batch_delay().is_zero() {
                sleep(self.config.batch_delay()).await;
            }
        }

        Ok(report)
    }

    async fn process_block(&self, height: u64) -> BlockOutcome {
        let block = match self.fetch_block(height).await {
            Ok(block) => block,
            Err(e) => return self.unreadable(height, "block", e),
        };

        let mut tally = Tally::default();
        self.credit_native(&block, &mut tally).await;

        match self.fetch_logs(height).await {
            Ok(logs) => self.credit_tokens(height, logs, &mut tally).await,
            Err(e) => return self.unreadable(height, "transfer logs", e),
        }

        BlockOutcome::Processed(tally)
    }

    fn unreadable(&self, height: u64, what: &str, e: ScannerError) -> BlockOutcome {
        if self.config.skip_missing_blocks {
            warn!(
                "Skipping {} of block {} after {} attempts: {}",
                what,
                height,
                self.config.block_fetch_retries + 1,
                e
            );
            BlockOutcome::Skipped
        } else {
            error!("Cannot read {} of block {}: {}", what, height, e);
            BlockOutcome::Halted
        }
    }

    async fn credit_native(&self, block: &ChainBlock, tally: &mut Tally) {
        for deposit in DetectedDeposit::native_from_block(block) {
            tally.add(self.credit_detected(block.number, deposit).await);
        }
    }

    async fn credit_tokens(&self, height: u64, logs: Vec<TransferLog>, tally: &mut Tally) {
        for log in logs {
            let Some(transfer) = log.decode() else {
                debug!("Ignoring non-ERC20 transfer log in tx {}", log.tx_hash);
                continue;
            };
            if transfer.raw_amount.bits() == 0 {
                continue;
            }
            if !self.accepted_tokens.is_empty() && !self.accepted_tokens.contains(&transfer.token)
            {
                debug!(
                    "Ignoring transfer of unlisted token {} in tx {}",
                    transfer.token, transfer.tx_hash
                );
                continue;
            }
            tally.add(
                self.credit_detected(height, DetectedDeposit::from_token_transfer(transfer))
                    .await,
            );
        }
    }

    /// Match and credit one transfer; failures are logged, never propagated
    async fn credit_detected(&self, height: u64, deposit: DetectedDeposit) -> Credit {
        let user_id = match self.index.find_owner(&deposit.to_address).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => return Credit::NotApplied,
            Err(e) => {
                error!(
                    block = height,
                    tx_hash = %deposit.tx_hash,
                    "Owner lookup for {} failed: {}",
                    deposit.to_address,
                    e
                );
                return Credit::NotApplied;
            }
        };

        let (currency, decimals) = match &deposit.source {
            DepositSource::Native => (self.config.native_currency.clone(), NATIVE_DECIMALS),
            DepositSource::Token(token) => (token.to_string(), self.token_decimals(token).await),
        };

        let request = CreditRequest {
            user_id,
            raw_amount: deposit.raw_amount,
            decimals,
            tx_hash: deposit.tx_hash,
            currency,
        };

        match self.deposits.credit(&request).await {
            Ok(outcome) if outcome.is_credited() => Credit::Applied,
            Ok(_) => Credit::NotApplied,
            Err(DepositError::Ledger(e)) if e.is_conflict() => {
                warn!(
                    block = height,
                    user_id,
                    tx_hash = %request.tx_hash,
                    "{} deposit not credited, already credited or transient conflict: {}",
                    request.currency,
                    e
                );
                Credit::Conflict
            }
            Err(e) => {
                error!(
                    block = height,
                    user_id,
                    tx_hash = %request.tx_hash,
                    "Failed to credit {} deposit: {}",
                    request.currency,
                    e
                );
                Credit::NotApplied
            }
        }
    }

    /// `decimals()` of a token, falling back to 18 when the call fails
    async fn token_decimals(&self, token: &EvmAddress) -> u32 {
        let cached = self
            .decimals_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(token).copied());
        if let Some(decimals) = cached {
            return decimals;
        }

        match self.reader.get_token_decimals(token).await {
            Ok(decimals) => {
                if let Ok(mut cache) = self.decimals_cache.lock() {
                    cache.insert(token.clone(), decimals);
                }
                decimals
            }
            Err(e) => {
                warn!(
                    "decimals() of {} failed, assuming {}: {}",
                    token, DEFAULT_TOKEN_DECIMALS, e
                );
                DEFAULT_TOKEN_DECIMALS
            }
        }
    }

    async fn fetch_block(&self, height: u64) -> Result<ChainBlock, ScannerError> {
        self.with_retries("block", height, || async {
            self.reader
                .get_block(height)
                .await?
                .ok_or(ScannerError::BlockNotFound(height))
        })
        .await
    }

    async fn fetch_logs(&self, height: u64) -> Result<Vec<TransferLog>, ScannerError> {
        self.with_retries("logs", height, || self.reader.get_transfer_logs(height, height))
            .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        what: &str,
        height: u64,
        mut op: F,
    ) -> Result<T, ScannerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScannerError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.block_fetch_retries => {
                    attempt += 1;
                    debug!(
                        "Fetching {} of block {} failed (attempt {}): {}",
                        what, height, attempt, e
                    );
                    sleep(self.config.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
