//! Sweep executor: runs every exit-parameter combination for one subject.
//!
//! Phases: Idle → FetchingData → Sweeping → Validating → Done, or Failed if
//! no usable price data arrives. The grid is split into chunks; each chunk is
//! evaluated on a bounded rayon pool (or inline when sequential) and reported
//! back to the calling thread, which owns the [`ProgressTracker`]. A failing
//! combination is counted and skipped, and a panicking chunk is counted as a
//! chunk failure. Neither aborts the sweep.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::mem::size_of;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use exitlab_core::data::{PriceDataSource, PriceTable};
use exitlab_core::filter::FilterChain;
use exitlab_core::params::{
    partition_chunks, Chunk, ParameterCombination, ParameterError, ParameterGrid,
};
use exitlab_core::schema::{
    FieldValue, PortfolioRecord, SchemaError, SchemaRegistry, SchemaShape, TransformOptions,
    TICKER,
};
use exitlab_core::strategy::{BacktestSettings, Backtester, EntryConfig, SignalGenerator};

use crate::config::{ConfigError, SweepConfig, SweepFingerprint};
use crate::progress::ProgressTracker;
use crate::validation::{validate_sweep_results, SweepValidation};

// ─── Errors ──────────────────────────────────────────────────────────

/// Executor setup failure. Runtime failures never surface as errors; they
/// are counted in [`SweepStatistics`].
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why one combination produced no record.
#[derive(Debug, Error)]
pub enum CombinationError {
    #[error("invalid parameters: {0}")]
    ParameterValidation(#[from] ParameterError),

    #[error("signal generation failed: {0}")]
    SignalGeneration(String),

    #[error("backtest failed: {0}")]
    Backtest(String),

    #[error("backtest produced no statistics")]
    StatsExtraction,

    #[error("schema transform failed: {0}")]
    Schema(#[from] SchemaError),
}

impl CombinationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CombinationError::ParameterValidation(_) => FailureKind::ParameterValidation,
            CombinationError::SignalGeneration(_) => FailureKind::SignalGeneration,
            CombinationError::Backtest(_) => FailureKind::Backtest,
            CombinationError::StatsExtraction => FailureKind::StatsExtraction,
            CombinationError::Schema(_) => FailureKind::Schema,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ParameterValidation,
    SignalGeneration,
    Backtest,
    StatsExtraction,
    Schema,
    /// Every combination of a chunk whose task panicked.
    ChunkTask,
}

/// Failed combinations by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub parameter_validation: usize,
    pub signal_generation: usize,
    pub backtest: usize,
    pub stats_extraction: usize,
    pub schema: usize,
    pub chunk_task: usize,
}

impl FailureCounts {
    pub fn record(&mut self, kind: FailureKind, count: usize) {
        *self.slot(kind) += count;
    }

    pub fn get(&self, kind: FailureKind) -> usize {
        match kind {
            FailureKind::ParameterValidation => self.parameter_validation,
            FailureKind::SignalGeneration => self.signal_generation,
            FailureKind::Backtest => self.backtest,
            FailureKind::StatsExtraction => self.stats_extraction,
            FailureKind::Schema => self.schema,
            FailureKind::ChunkTask => self.chunk_task,
        }
    }

    pub fn total(&self) -> usize {
        self.parameter_validation
            + self.signal_generation
            + self.backtest
            + self.stats_extraction
            + self.schema
            + self.chunk_task
    }

    pub fn merge(&mut self, other: &FailureCounts) {
        self.parameter_validation += other.parameter_validation;
        self.signal_generation += other.signal_generation;
        self.backtest += other.backtest;
        self.stats_extraction += other.stats_extraction;
        self.schema += other.schema;
        self.chunk_task += other.chunk_task;
    }

    fn slot(&mut self, kind: FailureKind) -> &mut usize {
        match kind {
            FailureKind::ParameterValidation => &mut self.parameter_validation,
            FailureKind::SignalGeneration => &mut self.signal_generation,
            FailureKind::Backtest => &mut self.backtest,
            FailureKind::StatsExtraction => &mut self.stats_extraction,
            FailureKind::Schema => &mut self.schema,
            FailureKind::ChunkTask => &mut self.chunk_task,
        }
    }
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepPhase {
    Idle,
    FetchingData,
    Sweeping,
    Validating,
    Done,
    Failed,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters for one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepStatistics {
    pub total_combinations: usize,
    /// Combinations that produced a record, including resumed ones.
    pub successful: usize,
    pub failed: usize,
    pub failures: FailureCounts,
    /// Records dropped by the filter chain.
    pub filtered_out: usize,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub chunks_resumed: usize,
    pub processing_secs: f64,
    /// Largest sampled estimate of price data plus result buffers.
    pub peak_memory_estimate_bytes: usize,
    /// Set when the sweep failed before evaluating anything.
    pub aborted: Option<String>,
}

impl SweepStatistics {
    /// Successful share of evaluated combinations, `0.0` when none ran.
    pub fn success_rate(&self) -> f64 {
        let evaluated = self.successful + self.failed;
        if evaluated == 0 {
            0.0
        } else {
            self.successful as f64 / evaluated as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepOutput {
    /// Subject the records are tagged with, after source resolution.
    pub subject: String,
    pub records: Vec<PortfolioRecord>,
    pub statistics: SweepStatistics,
    pub validation: SweepValidation,
}

/// Injected collaborators. Shared across worker threads.
#[derive(Clone)]
pub struct Collaborators {
    pub prices: Arc<dyn PriceDataSource>,
    pub signals: Arc<dyn SignalGenerator>,
    pub backtester: Arc<dyn Backtester>,
}

// ─── Chunk evaluation ────────────────────────────────────────────────

/// What a finished chunk task reports to the calling thread.
struct ChunkOutcome {
    index: usize,
    records: Vec<PortfolioRecord>,
    failures: FailureCounts,
    peak_bytes: usize,
}

/// Read-only view shared by all chunk tasks of one run.
struct ChunkContext<'a> {
    grid: &'a ParameterGrid,
    entry: &'a EntryConfig,
    backtest: &'a BacktestSettings,
    target: SchemaShape,
    registry: &'a SchemaRegistry,
    collaborators: &'a Collaborators,
    prices: &'a Arc<PriceTable>,
    subject: &'a str,
    reclaim_interval: usize,
}

impl ChunkContext<'_> {
    /// Evaluate a chunk, converting a panic into a whole-chunk failure.
    fn evaluate_chunk_guarded(&self, chunk: Chunk<'_>) -> ChunkOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_chunk(chunk))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(chunk = chunk.index, size = chunk.len(), "chunk task panicked");
                let mut failures = FailureCounts::default();
                failures.record(FailureKind::ChunkTask, chunk.len());
                ChunkOutcome {
                    index: chunk.index,
                    records: Vec::new(),
                    failures,
                    peak_bytes: 0,
                }
            }
        }
    }

    fn evaluate_chunk(&self, chunk: Chunk<'_>) -> ChunkOutcome {
        let mut records = Vec::with_capacity(chunk.len());
        let mut failures = FailureCounts::default();
        let mut peak_bytes = 0;

        for (i, combination) in chunk.combinations.iter().enumerate() {
            match self.evaluate_combination(combination) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(chunk = chunk.index, %combination, error = %e, "combination failed");
                    failures.record(e.kind(), 1);
                }
            }
            if (i + 1) % self.reclaim_interval == 0 {
                peak_bytes = peak_bytes.max(self.memory_estimate(&records));
            }
        }
        peak_bytes = peak_bytes.max(self.memory_estimate(&records));
        // Failed combinations leave reserved slots behind.
        records.shrink_to_fit();

        ChunkOutcome {
            index: chunk.index,
            records,
            failures,
            peak_bytes,
        }
    }

    fn memory_estimate(&self, records: &Vec<PortfolioRecord>) -> usize {
        self.prices.approx_bytes() + records.capacity() * size_of::<PortfolioRecord>()
    }

    /// Validate → signals → backtest → metrics → tag → transform.
    fn evaluate_combination(
        &self,
        combination: &ParameterCombination,
    ) -> Result<PortfolioRecord, CombinationError> {
        self.grid.validate(combination)?;

        let signals = match self
            .collaborators
            .signals
            .generate(self.prices, self.entry, combination)
        {
            Ok(Some(table)) if !table.is_empty() => table,
            Ok(_) => {
                return Err(CombinationError::SignalGeneration(
                    "no signals produced".into(),
                ))
            }
            Err(e) => return Err(CombinationError::SignalGeneration(e.to_string())),
        };

        let stats = match self.collaborators.backtester.run(&signals, self.backtest) {
            Ok(Some(stats)) => stats,
            Ok(None) => return Err(CombinationError::Backtest("no result".into())),
            Err(e) => return Err(CombinationError::Backtest(e.to_string())),
        };

        let mut metrics = stats
            .extract_metrics()
            .ok_or(CombinationError::StatsExtraction)?;

        for (column, value) in self.entry.tags() {
            metrics.insert(column.to_string(), value);
        }
        for (dimension, (_, value)) in self.grid.dimensions().iter().zip(combination.params()) {
            metrics.insert(dimension.column.clone(), FieldValue::from(*value));
        }
        metrics.insert(TICKER.to_string(), FieldValue::Text(self.subject.to_string()));

        Ok(self
            .registry
            .transform_to(self.target, &metrics, &TransformOptions::analysis())?)
    }
}

/// Run `pending` chunks, handing each outcome to `on_outcome` on the calling
/// thread. With a pool, outcomes arrive in completion order.
fn dispatch(
    ctx: &ChunkContext<'_>,
    pending: &[Chunk<'_>],
    pool: Option<&rayon::ThreadPool>,
    mut on_outcome: impl FnMut(ChunkOutcome),
) {
    let Some(pool) = pool else {
        for chunk in pending {
            on_outcome(ctx.evaluate_chunk_guarded(*chunk));
        }
        return;
    };

    let (tx, rx) = mpsc::channel::<ChunkOutcome>();
    pool.in_place_scope(move |scope| {
        for chunk in pending {
            let tx = tx.clone();
            let chunk = *chunk;
            scope.spawn(move |_| {
                // The receiver outlives the scope.
                let _ = tx.send(ctx.evaluate_chunk_guarded(chunk));
            });
        }
        drop(tx);
        for outcome in rx {
            on_outcome(outcome);
        }
    });
}

// ─── Executor ────────────────────────────────────────────────────────

pub struct SweepExecutor {
    config: SweepConfig,
    grid: ParameterGrid,
    fingerprint: SweepFingerprint,
    registry: Arc<SchemaRegistry>,
    tracker: ProgressTracker,
    collaborators: Collaborators,
    filters: FilterChain,
    phase: SweepPhase,
}

impl SweepExecutor {
    /// Validate `config` and build an idle executor. The tracker's freshness
    /// window is taken from the cache section.
    pub fn new(
        config: SweepConfig,
        registry: Arc<SchemaRegistry>,
        tracker: ProgressTracker,
        collaborators: Collaborators,
    ) -> Result<Self, SweepError> {
        config.validate()?;
        let grid = config.parameter_grid()?;
        let fingerprint = config.fingerprint()?;
        let filters = FilterChain::new(&config.minimums);
        let tracker = tracker.with_freshness_hours(config.cache.freshness_hours);
        Ok(Self {
            config,
            grid,
            fingerprint,
            registry,
            tracker,
            collaborators,
            filters,
            phase: SweepPhase::Idle,
        })
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ProgressTracker {
        &mut self.tracker
    }

    fn transition(&mut self, next: SweepPhase) {
        debug!(from = %self.phase, to = %next, "sweep phase");
        self.phase = next;
    }

    /// Sweep every combination for `subject`.
    ///
    /// Records come back in chunk order, filtered and validated. Progress is
    /// checkpointed per chunk under the requested subject name.
    pub fn run(&mut self, subject: &str) -> SweepOutput {
        let started = Instant::now();
        let combinations = self.grid.combinations();
        let chunks = partition_chunks(&combinations, self.config.execution.chunk_size);
        let mut stats = SweepStatistics {
            total_combinations: combinations.len(),
            chunks_total: chunks.len(),
            ..SweepStatistics::default()
        };

        info!(
            subject,
            combinations = combinations.len(),
            chunks = chunks.len(),
            "starting sweep"
        );

        self.transition(SweepPhase::FetchingData);
        let (prices, tag_subject) = match self.fetch_prices(subject) {
            Ok(fetched) => fetched,
            Err(reason) => {
                error!(subject, %reason, "sweep aborted");
                self.transition(SweepPhase::Failed);
                stats.processing_secs = started.elapsed().as_secs_f64();
                stats.aborted = Some(reason.clone());
                return SweepOutput {
                    subject: subject.to_string(),
                    records: Vec::new(),
                    statistics: stats,
                    validation: SweepValidation::failed(reason),
                };
            }
        };
        stats.peak_memory_estimate_bytes = prices.approx_bytes();

        self.transition(SweepPhase::Sweeping);
        if !self.config.execution.resume {
            if let Err(e) = self.tracker.store().clear_subject(subject) {
                warn!(subject, error = %e, "failed to clear caches");
            }
        }
        let resumed = self.tracker.start_tracking(
            subject,
            combinations.len(),
            chunks.len(),
            Some(&self.fingerprint),
        );
        let completed: BTreeSet<usize> = match self.tracker.state() {
            Some(state) if resumed => state.completed_chunks.clone(),
            _ => BTreeSet::new(),
        };

        let mut by_chunk: BTreeMap<usize, Vec<PortfolioRecord>> = BTreeMap::new();
        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if completed.contains(&chunk.index) {
                if let Some(records) = self.tracker.load_chunk(subject, chunk.index) {
                    stats.chunks_resumed += 1;
                    stats.chunks_completed += 1;
                    stats.successful += records.len();
                    stats.failed += chunk.len().saturating_sub(records.len());
                    by_chunk.insert(chunk.index, records);
                    continue;
                }
                info!(chunk = chunk.index, "cached chunk unavailable, re-evaluating");
            }
            pending.push(*chunk);
        }
        if stats.chunks_resumed > 0 {
            info!(
                subject,
                resumed = stats.chunks_resumed,
                pending = pending.len(),
                "resuming sweep"
            );
        }

        let pool = self.build_pool(pending.len());
        let ctx = ChunkContext {
            grid: &self.grid,
            entry: &self.config.entry,
            backtest: &self.config.backtest,
            target: self.config.target_shape,
            registry: &self.registry,
            collaborators: &self.collaborators,
            prices: &prices,
            subject: &tag_subject,
            reclaim_interval: self.config.execution.reclaim_interval,
        };
        let tracker = &mut self.tracker;
        dispatch(&ctx, &pending, pool.as_ref(), |outcome| {
            let failed = outcome.failures.total();
            stats.chunks_completed += 1;
            stats.successful += outcome.records.len();
            stats.failed += failed;
            stats.failures.merge(&outcome.failures);
            stats.peak_memory_estimate_bytes =
                stats.peak_memory_estimate_bytes.max(outcome.peak_bytes);

            tracker.update_chunk_progress(outcome.index, &outcome.records, failed);
            info!(
                chunk = outcome.index,
                successful = outcome.records.len(),
                failed,
                done = stats.chunks_completed,
                total = stats.chunks_total,
                "chunk complete"
            );
            by_chunk.insert(outcome.index, outcome.records);
        });

        self.transition(SweepPhase::Validating);
        let records: Vec<PortfolioRecord> = by_chunk.into_values().flatten().collect();
        let before = records.len();
        let records = self.filters.apply_records(records);
        stats.filtered_out = before - records.len();

        let tag_columns = self.grid.tag_columns();
        let validation = validate_sweep_results(
            &records,
            self.config.target_shape,
            &tag_columns,
            &self.config.validation,
        );
        if !validation.is_valid {
            warn!(subject, errors = ?validation.errors, "sweep results failed validation");
        }

        stats.processing_secs = started.elapsed().as_secs_f64();
        self.transition(SweepPhase::Done);
        info!(
            subject,
            successful = stats.successful,
            failed = stats.failed,
            kept = records.len(),
            secs = stats.processing_secs,
            "sweep complete"
        );

        SweepOutput {
            subject: tag_subject,
            records,
            statistics: stats,
            validation,
        }
    }

    /// Price table plus the subject to tag records with. `Err` carries the
    /// abort reason.
    fn fetch_prices(&self, subject: &str) -> Result<(Arc<PriceTable>, String), String> {
        let source = &self.collaborators.prices;
        match source.fetch(subject, &self.config.data) {
            Ok(Some(fetch)) if !fetch.table.is_empty() => {
                let resolved = fetch
                    .resolved_subject
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| subject.to_string());
                if resolved != subject {
                    info!(subject, %resolved, "source resolved subject");
                }
                info!(
                    source = source.name(),
                    bars = fetch.table.len(),
                    "price data loaded"
                );
                Ok((Arc::new(fetch.table), resolved))
            }
            Ok(Some(_)) => Err(format!("price data for {subject} is empty")),
            Ok(None) => Err(format!("no price data for {subject}")),
            Err(e) => Err(format!("price fetch for {subject} failed: {e}")),
        }
    }

    /// Pool of `min(max_workers, pending)` threads, or `None` to run inline.
    fn build_pool(&self, pending: usize) -> Option<rayon::ThreadPool> {
        let exec = &self.config.execution;
        if !exec.parallel || pending == 0 {
            return None;
        }
        let threads = exec.max_workers.min(pending);
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sweep-worker-{i}"))
            .build()
        {
            Ok(pool) => {
                debug!(threads, "sweep pool ready");
                Some(pool)
            }
            Err(e) => {
                warn!(error = %e, "failed to build sweep pool, running sequentially");
                None
            }
        }
    }
}
