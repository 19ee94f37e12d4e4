//! Criterion benchmarks for sweep hot paths.
//!
//! Benchmarks:
//! 1. Grid generation (volatility-stop grids of increasing size)
//! 2. Schema transformation (raw metrics → StopExtended record)
//! 3. Filter chain over typed records

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use exitlab_core::filter::{FilterChain, RecordSet};
use exitlab_core::params::ParameterGrid;
use exitlab_core::schema::{
    FieldValue, RawRecord, SchemaRegistry, SchemaShape, TransformOptions, BASE_COLUMNS,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_metrics(seed: usize) -> RawRecord {
    BASE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let value = match def.kind {
                exitlab_core::schema::ColumnType::Float => {
                    FieldValue::Float(((seed + i) as f64 * 0.37).sin() * 100.0)
                }
                exitlab_core::schema::ColumnType::Integer => FieldValue::Int((seed + i) as i64),
                _ => FieldValue::Null,
            };
            (def.name.to_string(), value)
        })
        .collect()
}

// ── 1. Grid generation ───────────────────────────────────────────────

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_generation");
    for max_len in [10i64, 50, 200] {
        let grid = ParameterGrid::volatility_stop((2, max_len), (1.0, 11.0), 0.5).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(grid.cardinality()),
            &grid,
            |b, grid| b.iter(|| black_box(grid.combinations())),
        );
    }
    group.finish();
}

// ── 2. Schema transformation ─────────────────────────────────────────

fn bench_transform(c: &mut Criterion) {
    let registry = SchemaRegistry::new();
    let mut raw = make_metrics(7);
    raw.insert("Stop Length".into(), FieldValue::Int(5));
    raw.insert("Stop Multiplier".into(), FieldValue::Float(2.5));
    let options = TransformOptions::analysis();

    c.bench_function("transform_stop_extended", |b| {
        b.iter(|| {
            registry
                .transform_to(SchemaShape::StopExtended, black_box(&raw), &options)
                .unwrap()
        })
    });
}

// ── 3. Filter chain ──────────────────────────────────────────────────

fn bench_filter(c: &mut Criterion) {
    let registry = SchemaRegistry::new();
    let records: Vec<_> = (0..1_000)
        .map(|i| {
            registry
                .transform_to(SchemaShape::Extended, &make_metrics(i), &TransformOptions::analysis())
                .unwrap()
        })
        .collect();
    let chain = FilterChain::new(&BTreeMap::from([
        ("WIN_RATE".to_string(), 0.2),
        ("SCORE".to_string(), 0.0),
    ]));

    c.bench_function("filter_chain_1000_records", |b| {
        b.iter(|| chain.apply(RecordSet::Records(records.clone())).unwrap())
    });
}

criterion_group!(benches, bench_grid, bench_transform, bench_filter);
criterion_main!(benches);
