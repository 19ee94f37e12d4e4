//! ExitLab CLI: sweep planning, checkpoint status, and result files.
//!
//! Commands:
//! - `plan`: print grid size, chunking, and fingerprint of a sweep config
//! - `status`: report checkpoint progress for cached subjects
//! - `export`: write a subject's cached records to CSV or JSON
//! - `validate`: check every row of a CSV file against a schema shape
//! - `filter`: apply the quality filter chain to a CSV file

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use polars::prelude::{CsvReadOptions, CsvWriter, SerReader, SerWriter};
use tracing::info;
use tracing_subscriber::EnvFilter;

use exitlab_core::filter::{FilterChain, RecordSet};
use exitlab_core::params::chunk_count;
use exitlab_core::schema::{validate_schema, SchemaRegistry, SchemaShape, TransformOptions};
use exitlab_runner::{
    export_records_csv, export_records_json, raw_rows_from_csv, CacheStore, ProgressState,
    ProgressTracker, SweepConfig,
};

#[derive(Parser)]
#[command(name = "exitlab", about = "ExitLab CLI: exit-parameter sensitivity sweeps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the grid, chunking, and fingerprint of a sweep config.
    Plan {
        /// Path to a TOML sweep config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Report checkpoint progress for cached subjects.
    Status {
        /// Only this subject. Defaults to every cached subject.
        subject: Option<String>,

        /// Sweep cache directory.
        #[arg(long, default_value = "cache/sweeps")]
        cache_dir: PathBuf,
    },
    /// Write a subject's cached chunk records to a file.
    Export {
        subject: String,

        /// Output file.
        #[arg(long)]
        out: PathBuf,

        /// Target shape. Defaults to the shape of the cached records.
        #[arg(long, value_parser = parse_shape)]
        shape: Option<SchemaShape>,

        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// Sweep cache directory.
        #[arg(long, default_value = "cache/sweeps")]
        cache_dir: PathBuf,
    },
    /// Check every row of a CSV file against a schema shape.
    Validate {
        file: PathBuf,

        #[arg(long, value_parser = parse_shape)]
        shape: SchemaShape,
    },
    /// Drop rows with invalid metrics or below configured minimums.
    Filter {
        file: PathBuf,

        /// Output CSV file.
        #[arg(long)]
        out: PathBuf,

        /// Minimum as KEY=VALUE, e.g. WIN_RATE=0.45 or TRADES=20. Repeatable.
        #[arg(long = "min", value_parser = parse_minimum)]
        minimums: Vec<(String, f64)>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { config } => run_plan(&config),
        Commands::Status { subject, cache_dir } => run_status(&cache_dir, subject.as_deref()),
        Commands::Export {
            subject,
            out,
            shape,
            format,
            cache_dir,
        } => run_export(&cache_dir, &subject, &out, shape, format),
        Commands::Validate { file, shape } => run_validate(&file, shape),
        Commands::Filter {
            file,
            out,
            minimums,
        } => run_filter(&file, &out, minimums.into_iter().collect()),
    }
}

fn parse_shape(s: &str) -> Result<SchemaShape, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_minimum(s: &str) -> Result<(String, f64), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {key}: {e}"))?;
    Ok((key.trim().to_uppercase(), value))
}

fn run_plan(path: &Path) -> Result<()> {
    let config = SweepConfig::from_file(path)?;
    config.validate()?;
    let grid = config.parameter_grid()?;
    let total = grid.cardinality();

    println!("Config: {}", path.display());
    println!("Target shape: {}", config.target_shape);
    println!(
        "Entry: {} {}/{}/{}",
        config.entry.strategy_type,
        config.entry.short_window,
        config.entry.long_window,
        config.entry.signal_window
    );
    println!();
    println!("{:<20} {:<20} {:>8}", "Dimension", "Column", "Values");
    println!("{}", "-".repeat(50));
    for dim in grid.dimensions() {
        println!(
            "{:<20} {:<20} {:>8}",
            dim.name,
            dim.column,
            dim.range.cardinality()
        );
    }
    println!();
    println!("Combinations: {total}");
    println!(
        "Chunks: {} of up to {}",
        chunk_count(total, config.execution.chunk_size),
        config.execution.chunk_size
    );
    println!(
        "Workers: {}",
        if config.execution.parallel {
            config.execution.max_workers
        } else {
            1
        }
    );
    println!("Fingerprint: {}", config.fingerprint()?);
    Ok(())
}

fn run_status(cache_dir: &Path, subject: Option<&str>) -> Result<()> {
    let store = CacheStore::new(cache_dir);
    let subjects = match subject {
        Some(s) => vec![s.to_string()],
        None => store.subjects()?,
    };
    if subjects.is_empty() {
        println!("No sweep checkpoints in {}", cache_dir.display());
        return Ok(());
    }

    println!(
        "{:<12} {:>14} {:>8} {:>8} {:>8} {:<20} {:<20}",
        "Subject", "Progress", "Done", "OK", "Failed", "Last Update", "ETA"
    );
    println!("{}", "-".repeat(96));
    for subject in &subjects {
        let Some(state) = store.read_checkpoint::<ProgressState>(subject)? else {
            println!("{subject:<12} (no checkpoint)");
            continue;
        };
        let eta = state
            .estimated_completion
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<12} {:>14} {:>7.1}% {:>8} {:>8} {:<20} {:<20}",
            subject,
            format!(
                "{}/{} chunks",
                state.completed_chunks.len(),
                state.total_chunks
            ),
            state.fraction_complete() * 100.0,
            state.successful_combinations,
            state.failed_combinations,
            state.last_update_time.format("%Y-%m-%d %H:%M:%S"),
            eta
        );
    }
    Ok(())
}

fn run_export(
    cache_dir: &Path,
    subject: &str,
    out: &Path,
    shape: Option<SchemaShape>,
    format: ExportFormat,
) -> Result<()> {
    let tracker = ProgressTracker::new(CacheStore::new(cache_dir));
    let records = tracker.get_cached_results(subject);
    if records.is_empty() {
        bail!("no cached records for {subject} in {}", cache_dir.display());
    }
    let count = records.len();

    match format {
        ExportFormat::Csv => {
            let shape = shape.unwrap_or_else(|| records[0].shape());
            export_records_csv(out, &records, shape, &SchemaRegistry::new())?;
        }
        ExportFormat::Json => {
            let records = match shape {
                Some(shape) => {
                    let registry = SchemaRegistry::new();
                    records
                        .iter()
                        .map(|r| registry.convert(r, shape, &TransformOptions::default()))
                        .collect::<Result<Vec<_>, _>>()
                        .context("failed to convert cached records")?
                }
                None => records,
            };
            export_records_json(out, &records)?;
        }
    }
    info!(subject, records = count, path = %out.display(), "export written");
    println!("Exported {count} records of {subject} to {}", out.display());
    Ok(())
}

fn run_validate(file: &Path, shape: SchemaShape) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows = raw_rows_from_csv(&text)?;

    let mut invalid = 0;
    for (i, row) in rows.iter().enumerate() {
        let check = validate_schema(row, shape);
        if !check.is_valid {
            invalid += 1;
            for error in &check.errors {
                println!("row {i}: {error}");
            }
        }
    }

    println!(
        "{}: {} rows, {} invalid against {shape}",
        file.display(),
        rows.len(),
        invalid
    );
    if invalid > 0 {
        bail!("{invalid} of {} rows do not conform to {shape}", rows.len());
    }
    Ok(())
}

fn run_filter(file: &Path, out: &Path, minimums: BTreeMap<String, f64>) -> Result<()> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(file.to_path_buf()))
        .with_context(|| format!("failed to open {}", file.display()))?
        .finish()
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let before = df.height();

    let chain = FilterChain::new(&minimums);
    let mut kept = match chain.apply(RecordSet::Frame(df))? {
        RecordSet::Frame(df) => df,
        _ => bail!("filter chain returned a non-frame result"),
    };

    let mut writer = File::create(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    CsvWriter::new(&mut writer)
        .include_header(true)
        .finish(&mut kept)
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!(
        "Kept {} of {before} rows ({} rules) -> {}",
        kept.height(),
        chain.minimums().rules().len(),
        out.display()
    );
    Ok(())
}
