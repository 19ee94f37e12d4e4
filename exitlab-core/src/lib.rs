//! ExitLab Core: parameter grids, result schemas, and quality filters for
//! exit-rule sensitivity sweeps.
//!
//! This crate holds everything a sweep needs that does not touch the
//! filesystem or spawn threads:
//! - Exit-parameter grids and deterministic chunk partitioning
//! - The five record shapes, typed records, and the schema registry
//! - The filter chain (invalid metrics, then configured minimums)
//! - Price tables and the collaborator traits (price source, signal
//!   generator, backtester)

pub mod data;
pub mod filter;
pub mod params;
pub mod schema;
pub mod strategy;
