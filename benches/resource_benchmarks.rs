//! Performance benchmarks for Anima
//!
//! These benchmarks cover the per-frame and per-request paths: context
//! acquisition, memory cleanup, the tier controller, the runtime tick and
//! asset scheduling.

use anima::{
    assets::{AssetDescriptor, AssetFetcher, AssetScheduler, AssetType, FetchError},
    config::{AnimaConfig, AssetConfig, PoolConfig, QualityConfig},
    context::{ContextOptions, ContextPoolManager, HeadlessBackend},
    monitor::{MemorySnapshot, StaticTelemetry},
    quality::{QualityController, QualityTier},
    AdaptiveRuntime, BenchmarkResult,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::{Duration, Instant};

struct NullFetcher;

impl AssetFetcher for NullFetcher {
    async fn fetch(&self, _descriptor: &AssetDescriptor) -> Result<Vec<u8>, FetchError> {
        Ok(Vec::new())
    }
}

/// Benchmark acquire/release churn through the pool
fn bench_context_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_pool");

    group.bench_function("acquire_release_pooled", |b| {
        let mut pool = ContextPoolManager::new(HeadlessBackend::new(256, 256), &PoolConfig::default());
        let mut surface = 0u64;
        b.iter(|| {
            surface += 1;
            if let Some(id) = pool.acquire(format!("s{}", surface), ContextOptions::default()).context_id() {
                black_box(pool.release(id)).ok();
            }
        });
    });

    for count in [8usize, 32, 128].iter() {
        group.bench_with_input(format!("cleanup_{}_contexts", count), count, |b, &count| {
            b.iter_batched(
                || {
                    let config = PoolConfig {
                        max_contexts: count,
                        memory_budget_mb: 4096,
                        ..PoolConfig::default()
                    };
                    let mut pool = ContextPoolManager::new(HeadlessBackend::new(64, 64), &config);
                    for i in 0..count {
                        pool.acquire(format!("s{}", i), ContextOptions::default());
                    }
                    pool
                },
                |mut pool| black_box(pool.perform_memory_cleanup()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark the tier controller and the full runtime tick
fn bench_frame_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_path");

    group.bench_function("quality_observe_frame", |b| {
        let mut controller = QualityController::new(QualityTier::Medium, &QualityConfig::default());
        let mut now = Instant::now();
        b.iter(|| {
            now += Duration::from_millis(16);
            black_box(controller.observe_frame(Duration::from_millis(16), now))
        });
    });

    group.bench_function("runtime_tick", |b| {
        let mut runtime = AdaptiveRuntime::new(
            &AnimaConfig::default(),
            HeadlessBackend::new(128, 128),
            StaticTelemetry::new(Some(MemorySnapshot::new(128 * 1024 * 1024, 8192 * 1024 * 1024))),
            &BenchmarkResult::estimated(60.0, 60.0, 60.0),
        );
        runtime.contexts_mut().acquire("main", ContextOptions::default());
        let mut now = Instant::now();
        b.iter(|| {
            now += Duration::from_millis(16);
            black_box(runtime.tick(Duration::from_millis(16), now))
        });
    });

    group.finish();
}

/// Benchmark enqueue and drain of a mixed batch
fn bench_asset_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("asset_scheduler");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for count in [16usize, 128].iter() {
        group.bench_with_input(format!("enqueue_drain_{}", count), count, |b, &count| {
            b.iter_batched(
                || {
                    let descriptors: Vec<AssetDescriptor> = (0..count)
                        .map(|i| match i % 3 {
                            0 => AssetDescriptor::image(format!("tex-{}.png", i), 64, 64),
                            1 => AssetDescriptor::model(format!("mesh-{}.glb", i), 256, 32),
                            _ => AssetDescriptor::new(AssetType::Script, format!("code-{}.js", i)),
                        })
                        .collect();
                    (AssetScheduler::new(NullFetcher, &AssetConfig::default()), descriptors)
                },
                |(mut scheduler, descriptors)| {
                    for descriptor in descriptors {
                        black_box(scheduler.enqueue(descriptor)).ok();
                    }
                    black_box(runtime.block_on(scheduler.drain()))
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_context_pool, bench_frame_path, bench_asset_scheduler);
criterion_main!(benches);
