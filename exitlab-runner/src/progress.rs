//! Resumable sweep progress.
//!
//! The tracker owns the per-subject [`ProgressState`], persists a chunk blob
//! and a checkpoint after every chunk, and restores a checkpoint on restart
//! when it is fresh and belongs to the same sweep. Persistence failures are
//! logged and never interrupt a sweep.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, Utc};
use exitlab_core::schema::PortfolioRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ChunkCache};

/// Default checkpoint freshness window.
pub const DEFAULT_FRESHNESS_HOURS: u32 = 24;

/// Progress of one subject's sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub subject: String,
    pub total_combinations: usize,
    pub completed_combinations: usize,
    pub successful_combinations: usize,
    pub failed_combinations: usize,
    pub current_chunk: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub completed_chunks: BTreeSet<usize>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl ProgressState {
    pub fn new(
        subject: &str,
        total_combinations: usize,
        total_chunks: usize,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            total_combinations,
            completed_combinations: 0,
            successful_combinations: 0,
            failed_combinations: 0,
            current_chunk: 0,
            total_chunks,
            completed_chunks: BTreeSet::new(),
            fingerprint: fingerprint.map(str::to_string),
            start_time: now,
            last_update_time: now,
            estimated_completion: None,
        }
    }

    pub fn remaining_combinations(&self) -> usize {
        self.total_combinations
            .saturating_sub(self.completed_combinations)
    }

    /// Completion in `[0, 1]`.
    pub fn fraction_complete(&self) -> f64 {
        if self.total_combinations == 0 {
            return 1.0;
        }
        (self.completed_combinations as f64 / self.total_combinations as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_chunks.len() >= self.total_chunks
    }
}

/// Observer invoked after every chunk update.
pub type ProgressCallback = Box<dyn Fn(&ProgressState) + Send + Sync>;

/// Tracks and persists sweep progress for one subject at a time.
pub struct ProgressTracker {
    store: CacheStore,
    freshness: Duration,
    state: Option<ProgressState>,
    resumed: bool,
    session_start: DateTime<Utc>,
    session_processed: usize,
    callbacks: Vec<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            freshness: Duration::hours(i64::from(DEFAULT_FRESHNESS_HOURS)),
            state: None,
            resumed: false,
            session_start: Utc::now(),
            session_processed: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn with_freshness_hours(mut self, hours: u32) -> Self {
        self.freshness = Duration::hours(i64::from(hours));
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn state(&self) -> Option<&ProgressState> {
        self.state.as_ref()
    }

    /// Whether the current session continues a restored checkpoint.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn register_callback(&mut self, callback: impl Fn(&ProgressState) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Begin tracking `subject`. Returns `true` when a checkpoint was restored.
    ///
    /// A checkpoint is restored only if it was updated within the freshness
    /// window and matches `fingerprint` and both totals. Otherwise the
    /// subject's caches are cleared and a fresh state is created.
    pub fn start_tracking(
        &mut self,
        subject: &str,
        total_combinations: usize,
        total_chunks: usize,
        fingerprint: Option<&str>,
    ) -> bool {
        let now = Utc::now();
        self.session_start = now;
        self.session_processed = 0;

        let restored = match self.store.read_checkpoint::<ProgressState>(subject) {
            Ok(Some(saved)) => {
                let age = now - saved.last_update_time;
                if age > self.freshness {
                    info!(subject, age_hours = age.num_hours(), "checkpoint is stale, starting fresh");
                    None
                } else if saved.fingerprint.as_deref() != fingerprint
                    || saved.total_combinations != total_combinations
                    || saved.total_chunks != total_chunks
                {
                    info!(subject, "checkpoint belongs to a different sweep, starting fresh");
                    None
                } else {
                    Some(saved)
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(subject, error = %e, "unreadable checkpoint, starting fresh");
                None
            }
        };

        self.resumed = restored.is_some();
        let state = match restored {
            Some(mut saved) => {
                info!(
                    subject,
                    completed = saved.completed_combinations,
                    chunks = saved.completed_chunks.len(),
                    "resuming from checkpoint"
                );
                saved.start_time = now;
                saved
            }
            None => {
                if let Err(e) = self.store.clear_subject(subject) {
                    warn!(subject, error = %e, "failed to clear stale caches");
                }
                ProgressState::new(subject, total_combinations, total_chunks, fingerprint, now)
            }
        };

        if let Err(e) = self.store.write_checkpoint(subject, &state) {
            warn!(subject, error = %e, "failed to write checkpoint");
        }
        self.state = Some(state);
        self.resumed
    }

    /// Record a finished chunk: update counters and ETA, persist the chunk
    /// blob and checkpoint, and notify callbacks.
    pub fn update_chunk_progress(
        &mut self,
        chunk_index: usize,
        results: &[PortfolioRecord],
        failed_count: usize,
    ) {
        let Some(state) = self.state.as_mut() else {
            warn!(chunk_index, "chunk progress reported before tracking started");
            return;
        };

        let processed = results.len() + failed_count;
        let now = Utc::now();
        if state.completed_chunks.insert(chunk_index) {
            state.completed_combinations += processed;
            state.successful_combinations += results.len();
            state.failed_combinations += failed_count;
        } else {
            debug!(chunk_index, "chunk reported again, counters unchanged");
        }
        state.current_chunk = chunk_index;
        state.last_update_time = now;

        self.session_processed += processed;
        state.estimated_completion = estimate_completion(
            now,
            self.session_start,
            self.session_processed,
            state.remaining_combinations(),
        );

        let blob = ChunkCache {
            subject: state.subject.clone(),
            chunk_index,
            created_at: now,
            records: results.to_vec(),
        };
        match self.store.write_chunk(&blob) {
            Ok(true) => debug!(chunk_index, records = results.len(), "chunk cached"),
            Ok(false) => debug!(chunk_index, "chunk already cached, keeping existing blob"),
            Err(e) => warn!(chunk_index, error = %e, "failed to cache chunk"),
        }
        let state = &*state;
        if let Err(e) = self.store.write_checkpoint(&state.subject, state) {
            warn!(chunk_index, error = %e, "failed to write checkpoint");
        }

        for (i, callback) in self.callbacks.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                warn!(callback = i, "progress callback panicked");
            }
        }
    }

    /// Records of one cached chunk, or `None` if the blob is missing or
    /// unreadable.
    pub fn load_chunk(&self, subject: &str, chunk_index: usize) -> Option<Vec<PortfolioRecord>> {
        match self.store.read_chunk(subject, chunk_index) {
            Ok(Some(blob)) => Some(blob.records),
            Ok(None) => None,
            Err(e) => {
                warn!(subject, chunk_index, error = %e, "skipping unreadable chunk cache");
                None
            }
        }
    }

    /// Every cached record of `subject`, in chunk order. Corrupt blobs are
    /// skipped.
    pub fn get_cached_results(&self, subject: &str) -> Vec<PortfolioRecord> {
        let indices = match self.store.chunk_indices(subject) {
            Ok(indices) => indices,
            Err(e) => {
                warn!(subject, error = %e, "failed to list chunk caches");
                return Vec::new();
            }
        };
        indices
            .into_iter()
            .filter_map(|index| self.load_chunk(subject, index))
            .flatten()
            .collect()
    }
}

/// ETA from this session's throughput. `None` until there is a rate.
fn estimate_completion(
    now: DateTime<Utc>,
    session_start: DateTime<Utc>,
    session_processed: usize,
    remaining: usize,
) -> Option<DateTime<Utc>> {
    if remaining == 0 {
        return Some(now);
    }
    let elapsed_secs = (now - session_start).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 || session_processed == 0 {
        return None;
    }
    let rate = session_processed as f64 / elapsed_secs;
    let eta_ms = (remaining as f64 / rate * 1000.0).round() as i64;
    Some(now + Duration::milliseconds(eta_ms))
}
