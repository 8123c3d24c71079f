//! Polling update source.
//!
//! Each tick opens one transaction, merges every update-log table through a
//! [`MultiQueryCursor`], turns rows into change events, hands them to the
//! registered consumers in batches and deletes the delivered rows. The tick
//! commits only after the last batch; any error rolls the whole tick back
//! so the same rows are delivered again on the next tick.
//!
//! A started source owns one tokio task that runs ticks back to back with a
//! fixed delay in between. Pause and stop are observed at tick boundaries
//! only. A mutex held for the full tick serializes ticks with `stop()` and
//! with manual [`UpdateSource::run_tick`] calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dbsync_model::{validate_naming, EventModelInfo};
use dbsync_storage::{Database, Transaction};
use dbsync_types::{ChangeEvent, ColumnValue};

use crate::config::SourceConfig;
use crate::consumer::UpdateConsumer;
use crate::cursor::{CursorQuery, MultiQueryCursor};
use crate::error::SourceError;
use crate::status::{PollerSnapshot, PollerStatus};

/// Lifecycle state of an update source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    Paused,
}

/// Counters of one committed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub events_delivered: usize,
    pub rows_deleted: u64,
    pub batches: usize,
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickStats),
    Skipped(String),
}

/// Events and log row ids accumulated since the last delivery.
struct PendingBatch {
    events: Vec<ChangeEvent>,
    /// Delivered row ids per source, in query order
    rows: Vec<Vec<ColumnValue>>,
}

impl PendingBatch {
    fn new(sources: usize) -> Self {
        Self {
            events: Vec::new(),
            rows: vec![Vec::new(); sources],
        }
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty() && self.rows.iter().all(Vec::is_empty)
    }
}

struct Shared {
    db: Arc<dyn Database>,
    infos: Vec<EventModelInfo>,
    config: SourceConfig,
    consumers: OnceLock<Vec<Arc<dyn UpdateConsumer>>>,
    paused: AtomicBool,
    tick_lock: tokio::sync::Mutex<()>,
    status: PollerStatus,
}

impl Shared {
    async fn run_tick(&self) -> Result<TickOutcome, SourceError> {
        let _guard = self.tick_lock.lock().await;

        if self.paused.load(Ordering::SeqCst) {
            debug!("Update source paused, skipping tick");
            self.status.record_skip("paused");
            return Ok(TickOutcome::Skipped("paused".into()));
        }
        let consumers = self
            .consumers
            .get()
            .ok_or_else(|| SourceError::IllegalState("no update consumers registered".into()))?;
        if !self.db.is_available().await {
            debug!("Database unavailable, skipping tick");
            self.status.record_skip("database unavailable");
            return Ok(TickOutcome::Skipped("database unavailable".into()));
        }

        self.status.record_start();
        let start = Instant::now();
        let result = self.tick(consumers).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(stats) => {
                self.status.record_success(
                    stats.events_delivered as u64,
                    stats.rows_deleted,
                    duration_ms,
                );
                if stats.events_delivered > 0 {
                    info!(
                        events = stats.events_delivered,
                        rows = stats.rows_deleted,
                        batches = stats.batches,
                        duration_ms,
                        "Tick committed"
                    );
                }
            }
            Err(e) => {
                self.status.record_failure(e.to_string(), duration_ms);
                match e {
                    SourceError::Consumer { consumer, .. } => error!(
                        consumer = %consumer,
                        error = %e,
                        "Consumer failed, tick rolled back, index may be inconsistent"
                    ),
                    _ if e.is_fatal() => error!(error = %e, "Fatal update source error"),
                    _ => warn!(error = %e, "Tick failed and was rolled back, retrying next tick"),
                }
            }
        }
        result.map(TickOutcome::Completed)
    }

    async fn tick(&self, consumers: &[Arc<dyn UpdateConsumer>]) -> Result<TickStats, SourceError> {
        let mut tx = self.db.begin().await?;
        match self.drain(tx.as_mut(), consumers).await {
            Ok(stats) => {
                tx.commit().await?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        tx: &mut dyn Transaction,
        consumers: &[Arc<dyn UpdateConsumer>],
    ) -> Result<TickStats, SourceError> {
        let queries = self
            .infos
            .iter()
            .map(|info| CursorQuery::new(info.update_table_name(), info.update_id_column()))
            .collect();
        let mut cursor = MultiQueryCursor::open(tx, queries, self.config.page_size).await?;
        let mut batch = PendingBatch::new(self.infos.len());
        let mut stats = TickStats::default();

        while cursor.next(tx).await? {
            let idx = cursor.current_source()?;
            let info = &self.infos[idx];
            let row = cursor.current()?;
            batch.events.extend(info.events_for_row(row)?);
            batch.rows[idx].push(ColumnValue::Int(info.update_id(row)?));

            if batch.events.len() >= self.config.delivery_batch_size {
                self.flush(tx, &mut cursor, consumers, &mut batch, &mut stats)
                    .await?;
            }
        }
        if !batch.is_empty() {
            self.flush(tx, &mut cursor, consumers, &mut batch, &mut stats)
                .await?;
        }
        Ok(stats)
    }

    /// Deliver the pending batch to every consumer, then delete its rows.
    async fn flush(
        &self,
        tx: &mut dyn Transaction,
        cursor: &mut MultiQueryCursor,
        consumers: &[Arc<dyn UpdateConsumer>],
        batch: &mut PendingBatch,
        stats: &mut TickStats,
    ) -> Result<(), SourceError> {
        // rows whose id columns were all NULL carry no event, only deletion
        if !batch.events.is_empty() {
            for consumer in consumers {
                consumer
                    .update_event(&batch.events)
                    .await
                    .map_err(|source| SourceError::Consumer {
                        consumer: consumer.name().to_string(),
                        source,
                    })?;
            }
        }

        for (info, ids) in self.infos.iter().zip(batch.rows.iter_mut()) {
            if ids.is_empty() {
                continue;
            }
            let deleted = tx
                .delete_rows(info.update_table_name(), info.update_id_column(), ids)
                .await?;
            cursor.adjust_position(info.update_table_name(), -(deleted as i64))?;
            stats.rows_deleted += deleted;
            ids.clear();
        }

        debug!(events = batch.events.len(), "Delivered batch");
        stats.events_delivered += batch.events.len();
        stats.batches += 1;
        batch.events.clear();
        Ok(())
    }
}

async fn poll_loop(shared: Arc<Shared>, token: CancellationToken) {
    info!(
        tables = shared.infos.len(),
        interval_ms = shared.config.poll_interval.as_millis() as u64,
        "Update source started"
    );
    loop {
        if token.is_cancelled() {
            break;
        }
        if let Err(e) = shared.run_tick().await {
            if e.is_fatal() {
                error!(error = %e, "Stopping update source");
                token.cancel();
                break;
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(shared.config.poll_interval) => {}
        }
    }
    info!("Update source loop exited");
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background poller draining update-log tables into consumers.
pub struct UpdateSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl UpdateSource {
    /// Create a stopped source over the given log tables.
    pub fn new(
        db: Arc<dyn Database>,
        infos: Vec<EventModelInfo>,
        config: SourceConfig,
    ) -> Result<Self, SourceError> {
        config.validate()?;
        validate_naming(&infos)?;
        Ok(Self {
            shared: Arc::new(Shared {
                db,
                infos,
                config,
                consumers: OnceLock::new(),
                paused: AtomicBool::new(false),
                tick_lock: tokio::sync::Mutex::new(()),
                status: PollerStatus::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the consumers, in delivery order. Allowed once.
    pub fn set_update_consumers(
        &self,
        consumers: Vec<Arc<dyn UpdateConsumer>>,
    ) -> Result<(), SourceError> {
        if consumers.is_empty() {
            return Err(SourceError::IllegalState(
                "at least one update consumer is required".into(),
            ));
        }
        let names: Vec<String> = consumers.iter().map(|c| c.name().to_string()).collect();
        self.shared
            .consumers
            .set(consumers)
            .map_err(|_| SourceError::IllegalState("update consumers already set".into()))?;
        info!(consumers = ?names, "Registered update consumers");
        Ok(())
    }

    /// Start polling on a background task. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> Result<(), SourceError> {
        if self.shared.consumers.get().is_none() {
            return Err(SourceError::IllegalState(
                "set_update_consumers must be called before start".into(),
            ));
        }
        let mut worker = self.worker();
        if let Some(existing) = worker.as_ref() {
            if !existing.token.is_cancelled() && !existing.handle.is_finished() {
                return Err(SourceError::AlreadyRunning);
            }
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(Arc::clone(&self.shared), token.clone()));
        *worker = Some(Worker { token, handle });
        Ok(())
    }

    /// Stop polling. Returns once any in-flight tick has finished.
    pub async fn stop(&self) {
        let worker = self.worker().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Update source task ended abnormally");
            }
        }
        let _guard = self.shared.tick_lock.lock().await;
        info!("Update source stopped");
    }

    /// Pause or resume. Takes effect at the next tick boundary.
    pub fn pause(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
        info!(paused, "Update source pause toggled");
    }

    pub fn state(&self) -> PollerState {
        let worker = self.worker();
        match worker.as_ref() {
            Some(w) if !w.token.is_cancelled() && !w.handle.is_finished() => {
                if self.shared.paused.load(Ordering::SeqCst) {
                    PollerState::Paused
                } else {
                    PollerState::Running
                }
            }
            _ => PollerState::Stopped,
        }
    }

    /// Run one tick now, serialized with the background task.
    pub async fn run_tick(&self) -> Result<TickOutcome, SourceError> {
        self.shared.run_tick().await
    }

    pub fn status(&self) -> PollerSnapshot {
        self.shared.status.snapshot()
    }

    pub fn infos(&self) -> &[EventModelInfo] {
        &self.shared.infos
    }
}

impl Drop for UpdateSource {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().as_ref() {
            worker.token.cancel();
        }
    }
}
