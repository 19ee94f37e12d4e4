//! CSV and JSON export of sweep records.
//!
//! CSV headers are exactly the columns of the target shape, in shape order.
//! Nulls are empty cells, durations are `"N days HH:MM:SS"`, and non-finite
//! floats are written as `NaN`/`inf`/`-inf`. Import infers cell types, detects
//! (or is told) the shape, and goes through the schema registry.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use exitlab_core::schema::{
    FieldValue, PortfolioRecord, RawRecord, SchemaRegistry, SchemaShape, TransformOptions,
};

// ─── CSV ────────────────────────────────────────────────────────────

/// Render records as CSV in `shape`. Records of another shape are converted.
pub fn records_to_csv(
    records: &[PortfolioRecord],
    shape: SchemaShape,
    registry: &SchemaRegistry,
) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(shape.columns().iter().map(|def| def.name))?;

    for (i, record) in records.iter().enumerate() {
        let converted;
        let record = if record.shape() == shape {
            record
        } else {
            converted = registry
                .convert(record, shape, &TransformOptions::default())
                .with_context(|| format!("failed to convert record {i} to {shape}"))?;
            &converted
        };
        wtr.write_record(record.values().iter().map(|(_, value)| value.to_cell()))?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Parse CSV produced by [`records_to_csv`] (or any file with the same
/// headers). With `shape` unset, the shape is detected per row.
pub fn records_from_csv(
    text: &str,
    registry: &SchemaRegistry,
    shape: Option<SchemaShape>,
) -> Result<Vec<PortfolioRecord>> {
    let mut rdr = csv::Reader::from_reader(text.as_bytes());
    let headers = rdr.headers().context("failed to read CSV header")?.clone();

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("failed to read CSV row {i}"))?;
        let raw: RawRecord = headers
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| (column.to_string(), FieldValue::infer(cell)))
            .collect();
        let Some(target) = shape.or_else(|| registry.detect_shape(&raw)) else {
            bail!("row {i}: columns do not match any schema shape");
        };
        let record = registry
            .transform_to(target, &raw, &TransformOptions::default())
            .with_context(|| format!("row {i}: failed to build {target} record"))?;
        records.push(record);
    }
    Ok(records)
}

/// Raw rows of a CSV file, cell types inferred. For validating files that
/// may not conform to any shape.
pub fn raw_rows_from_csv(text: &str) -> Result<Vec<RawRecord>> {
    let mut rdr = csv::Reader::from_reader(text.as_bytes());
    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    rdr.records()
        .enumerate()
        .map(|(i, row)| {
            let row = row.with_context(|| format!("failed to read CSV row {i}"))?;
            Ok(headers
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| (column.to_string(), FieldValue::infer(cell)))
                .collect())
        })
        .collect()
}

pub fn export_records_csv(
    path: &Path,
    records: &[PortfolioRecord],
    shape: SchemaShape,
    registry: &SchemaRegistry,
) -> Result<()> {
    let csv = records_to_csv(records, shape, registry)?;
    write_file(path, csv.as_bytes())
}

// ─── JSON ───────────────────────────────────────────────────────────

/// Pretty JSON array of records, each tagged with its shape.
pub fn records_to_json(records: &[PortfolioRecord]) -> Result<String> {
    serde_json::to_string_pretty(records).context("failed to serialize records to JSON")
}

pub fn records_from_json(json: &str) -> Result<Vec<PortfolioRecord>> {
    serde_json::from_str(json).context("failed to deserialize records from JSON")
}

pub fn export_records_json(path: &Path, records: &[PortfolioRecord]) -> Result<()> {
    let json = records_to_json(records)?;
    write_file(path, json.as_bytes())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
