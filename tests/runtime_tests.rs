// Adaptive runtime integration tests
//
// Wires the pool, monitor, tier controller and asset scheduler together
// and checks how memory and network signals propagate between them.

use anima::assets::{AssetDescriptor, AssetFetcher, AssetScheduler, AssetType, FetchError, LoadStrategy};
use anima::benchmark::{BenchmarkResult, CapabilityBenchmark, DeviceClass, DeviceSpecs, SyntheticFrameProbe};
use anima::config::AnimaConfig;
use anima::context::{ContextOptions, HeadlessBackend};
use anima::events::ResourceEvent;
use anima::monitor::{MemorySnapshot, NetworkQuality, PressureLevel, StaticTelemetry};
use anima::quality::QualityTier;
use anima::AdaptiveRuntime;
use std::time::{Duration, Instant};

const MB: u64 = 1024 * 1024;
const FRAME: Duration = Duration::from_millis(16);

struct InstantFetcher;

impl AssetFetcher for InstantFetcher {
    async fn fetch(&self, _descriptor: &AssetDescriptor) -> Result<Vec<u8>, FetchError> {
        Ok(vec![0; 8])
    }
}

fn runtime_at(tier_score: f64) -> AdaptiveRuntime<HeadlessBackend, StaticTelemetry> {
    AdaptiveRuntime::new(
        &AnimaConfig::default(),
        HeadlessBackend::new(128, 128),
        StaticTelemetry::new(Some(MemorySnapshot::new(64 * MB, 16_384 * MB))),
        &BenchmarkResult::estimated(tier_score, tier_score, tier_score),
    )
}

#[tokio::test]
async fn test_phone_estimate_seeds_low_tier() {
    let mut config = AnimaConfig::default();
    config.benchmark.live_profiling = false;
    config.benchmark.device = Some(DeviceSpecs {
        cores: 4,
        memory_gb: 3.0,
        class: DeviceClass::Phone,
        gpu_vendor: Some("Adreno 610".to_string()),
    });

    let mut benchmark = CapabilityBenchmark::new(&config.benchmark);
    let result = benchmark
        .run(&mut SyntheticFrameProbe::new(FRAME), &mut StaticTelemetry::unavailable())
        .await;

    let runtime = AdaptiveRuntime::new(
        &config,
        HeadlessBackend::default(),
        StaticTelemetry::unavailable(),
        &result,
    );
    assert_eq!(runtime.quality().tier(), QualityTier::Low);
    assert_eq!(runtime.quality().settings(), QualityTier::Low.settings());
}

#[tokio::test(start_paused = true)]
async fn test_critical_memory_demotes_attached_scheduler() {
    let mut runtime = runtime_at(90.0);
    let mut events = runtime.subscribe();

    let config = AnimaConfig::default();
    let mut scheduler = AssetScheduler::new(InstantFetcher, &config.assets);
    runtime.attach_scheduler(scheduler.strategy_handle());

    let start = Instant::now();
    runtime.tick(FRAME, start);
    runtime.telemetry_mut().set_used(505 * MB);
    let report = runtime.tick(FRAME, start + Duration::from_secs(1));

    assert_eq!(report.memory.map(|memory| memory.level), Some(PressureLevel::Critical));
    assert_eq!(runtime.quality().tier(), QualityTier::Minimal);
    assert_eq!(report.strategy_change, Some((LoadStrategy::Balanced, LoadStrategy::Conservative)));

    for i in 0..4 {
        scheduler
            .enqueue(AssetDescriptor::new(AssetType::Script, format!("chunk-{}.js", i)))
            .unwrap();
    }
    let drain = scheduler.drain().await;
    assert_eq!(drain.largest_batch, 2);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let position = |predicate: &dyn Fn(&ResourceEvent) -> bool| seen.iter().position(predicate);
    let pressure = position(&|event| {
        matches!(event, ResourceEvent::MemoryPressure { level: PressureLevel::Critical, .. })
    });
    let tier = position(&|event| matches!(event, ResourceEvent::TierChanged { to: QualityTier::Minimal, .. }));
    let strategy = position(&|event| matches!(event, ResourceEvent::StrategyChanged { .. }));
    assert!(pressure.is_some() && tier.is_some() && strategy.is_some());
    assert!(pressure < tier && tier < strategy);
}

#[test]
fn test_network_and_pressure_combine() {
    let mut runtime = runtime_at(60.0);
    let config = AnimaConfig::default();
    let scheduler = AssetScheduler::new(InstantFetcher, &config.assets);
    let handle = scheduler.strategy_handle();
    runtime.attach_scheduler(handle.clone());
    let start = Instant::now();
    runtime.tick(FRAME, start);

    runtime.on_network_change(NetworkQuality::Moderate);
    assert_eq!(handle.current(), LoadStrategy::Balanced);

    runtime.telemetry_mut().set_used(510 * MB);
    runtime.tick(FRAME, start + Duration::from_secs(1));
    assert_eq!(handle.current(), LoadStrategy::Conservative);

    // Network recovery waits for memory to recover
    assert_eq!(runtime.on_network_change(NetworkQuality::Fast), None);
    assert_eq!(handle.current(), LoadStrategy::Conservative);

    runtime.telemetry_mut().set_used(64 * MB);
    runtime.tick(FRAME, start + Duration::from_secs(2));
    assert_eq!(handle.current(), LoadStrategy::Balanced);
}

#[test]
fn test_missing_telemetry_is_tolerated() {
    let mut runtime = AdaptiveRuntime::new(
        &AnimaConfig::default(),
        HeadlessBackend::new(64, 64),
        StaticTelemetry::unavailable(),
        &BenchmarkResult::estimated(50.0, 50.0, 50.0),
    );
    let start = Instant::now();

    for i in 0..120 {
        let report = runtime.tick(FRAME, start + FRAME * i);
        assert!(report.memory.is_none());
    }
    assert_eq!(runtime.monitor().pressure(), PressureLevel::Normal);
    assert_eq!(runtime.monitor().stats().total_frames, 120);
}

#[test]
fn test_draw_calls_are_sampled_per_tick() {
    let mut runtime = runtime_at(60.0);
    let main = runtime
        .contexts_mut()
        .acquire("main", ContextOptions::default())
        .context_id()
        .unwrap();
    let overlay = runtime
        .contexts_mut()
        .acquire("overlay", ContextOptions::default())
        .context_id()
        .unwrap();

    runtime.contexts_mut().record_draw_calls(main, 40).unwrap();
    runtime.contexts_mut().record_draw_calls(overlay, 2).unwrap();

    let start = Instant::now();
    assert_eq!(runtime.tick(FRAME, start).draw_calls, 42);
    assert_eq!(runtime.tick(FRAME, start + FRAME).draw_calls, 0);
}

#[test]
fn test_slow_frames_step_tier_down_through_runtime() {
    let mut runtime = runtime_at(70.0);
    assert_eq!(runtime.quality().tier(), QualityTier::High);
    let start = Instant::now();
    let slow = Duration::from_millis(50);

    let mut dropped = 0;
    let mut changes = Vec::new();
    for i in 1..=130 {
        let report = runtime.tick(slow, start + slow * i);
        dropped += usize::from(report.frame.frame_rate_dropped);
        changes.extend(report.tier_changes);
    }

    assert_eq!(dropped, 1);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to, QualityTier::Medium);

    runtime.shutdown();
    assert_eq!(runtime.contexts().live_count(), 0);
}
