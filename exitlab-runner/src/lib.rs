//! ExitLab Runner: sweep execution, progress checkpoints, and export.
//!
//! This crate builds on `exitlab-core` to provide:
//! - TOML sweep configuration with content fingerprints
//! - Chunked, parallel sweep execution with per-combination failure isolation
//! - Write-once chunk caches and resumable progress checkpoints
//! - Post-sweep result validation
//! - CSV/JSON export of sweep records

pub mod cache;
pub mod config;
pub mod executor;
pub mod export;
pub mod progress;
pub mod validation;

pub use cache::{CacheError, CacheStore, ChunkCache};
pub use config::{
    CacheConfig, ConfigError, ExecutionConfig, GridConfig, SweepConfig, SweepFingerprint,
    ValidationConfig,
};
pub use executor::{
    Collaborators, CombinationError, FailureCounts, FailureKind, SweepError, SweepExecutor,
    SweepOutput, SweepPhase, SweepStatistics,
};
pub use export::{
    export_records_csv, export_records_json, raw_rows_from_csv, records_from_csv,
    records_from_json, records_to_csv, records_to_json,
};
pub use progress::{ProgressCallback, ProgressState, ProgressTracker, DEFAULT_FRESHNESS_HOURS};
pub use validation::{validate_sweep_results, SweepValidation};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn require_send<T: Send>() {}
    fn require_sync<T: Sync>() {}

    #[test]
    fn executor_and_tracker_can_move_between_threads() {
        require_send::<SweepExecutor>();
        require_send::<ProgressTracker>();
        require_sync::<ProgressTracker>();
        require_send::<Collaborators>();
        require_sync::<Collaborators>();
    }

    #[test]
    fn results_are_thread_safe() {
        require_send::<SweepOutput>();
        require_sync::<SweepOutput>();
        require_send::<SweepStatistics>();
        require_send::<ChunkCache>();
        require_sync::<CacheStore>();
    }
}
