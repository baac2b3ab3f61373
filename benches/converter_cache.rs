//! Converter Cache Benchmarks
//!
//! Measures the per-request overhead before a job reaches its converter:
//! canonicalizing the form configuration and looking up the cached converter.
//!
//! Run with: `cargo bench --bench converter_cache`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use docparse_server::converter::{ConverterCache, ConverterConfig};

/// Configuration shaped like a typical VLM request
fn request_config(variant: usize) -> ConverterConfig {
    ConverterConfig::new()
        .with("backend", "vlm-sglang-client")
        .with("parse_method", "vlm")
        .with("converter", "standard")
        .with("output_format", "markdown")
        .with("lang", "ch")
        .with("server_url", "http://localhost:30000")
        .with("temperature", 0.0)
        .with("top_p", 0.9)
        .with("max_new_tokens", 4096)
        .with("pages", serde_json::json!([0, [2, variant % 8 + 2]]))
}

fn bench_canonical_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical_key");
    group.measurement_time(Duration::from_secs(5));

    let config = request_config(3);
    group.bench_function("vlm_request", |b| b.iter(|| black_box(&config).key()));

    let nested = request_config(3).with(
        "page_schema",
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "authors": {"type": "array", "items": {"type": "string"}},
                "total": {"type": "number"}
            }
        }),
    );
    group.bench_function("with_page_schema", |b| b.iter(|| black_box(&nested).key()));

    group.finish();
}

fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");
    group.measurement_time(Duration::from_secs(5));

    for distinct in [1usize, 16, 256] {
        let cache: ConverterCache<String> = ConverterCache::unbounded();
        let keys: Vec<_> = (0..distinct).map(|i| request_config(i).with("variant", i).key()).collect();
        for key in &keys {
            let _ = cache.get_or_build(key, || Ok::<_, ()>(Arc::new(key.to_string())));
        }

        group.bench_with_input(BenchmarkId::new("hit", distinct), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(cache.get_or_build(key, || Ok::<_, ()>(Arc::new(String::new()))))
            })
        });
    }

    let bounded: ConverterCache<String> = ConverterCache::new(8);
    let keys: Vec<_> = (0..32).map(|i| request_config(i).with("variant", i).key()).collect();
    group.bench_function("evicting_bounded_8", |b| {
        let mut i = 0;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(bounded.get_or_build(key, || Ok::<_, ()>(Arc::new(String::new()))))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_canonical_key, bench_cache_lookup);
criterion_main!(benches);
