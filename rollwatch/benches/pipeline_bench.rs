//! Benchmarks for pipeline configuration equivalence.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rollwatch::core::{Network, PipelineMode, RegisterKind};
use rollwatch::pipeline::PipelineConfig;
use serde_json::json;

fn equivalence_benchmark(c: &mut Criterion) {
    let config = PipelineConfig::new(
        Network::Layer1,
        PipelineMode::Live,
        RegisterKind::EventLog,
    )
    .with_param("address", json!("0xAbCd000000000000000000000000000000000001"))
    .with_param(
        "topics",
        json!([
            "0x2222222222222222222222222222222222222222222222222222222222222222",
            "0x1111111111111111111111111111111111111111111111111111111111111111",
        ]),
    );

    c.bench_function("equivalence_digest", |b| {
        b.iter(|| black_box(&config).equivalence_digest())
    });

    c.bench_function("canonical_params", |b| {
        b.iter(|| black_box(&config).canonical_params())
    });
}

criterion_group!(benches, equivalence_benchmark);
criterion_main!(benches);
