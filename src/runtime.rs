//! Per-frame orchestration
//!
//! `AdaptiveRuntime` owns the context pool, the performance monitor and
//! the quality controller, and drives them from the host's rendering tick:
//! frames feed the monitor and the tier controller, memory is sampled on an
//! interval, pressure changes reach the tier controller and the asset
//! strategy, and over-budget memory triggers a context cleanup.

use log::{debug, info};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::assets::{LoadStrategy, StrategyHandle};
use crate::benchmark::BenchmarkResult;
use crate::config::AnimaConfig;
use crate::context::{CleanupReport, ContextBackend, ContextId, ContextPoolManager};
use crate::events::{EventBus, ResourceEvent};
use crate::monitor::{
    FrameReport, MemoryReport, MemoryTelemetry, NetworkQuality, PerformanceMonitor, PressureLevel,
};
use crate::quality::{QualityController, TierChange};

/// What happened during one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub frame: FrameReport,
    pub tier_changes: Vec<TierChange>,
    /// Present when memory was sampled this tick
    pub memory: Option<MemoryReport>,
    pub cleanup: Option<CleanupReport>,
    pub dropped_contexts: Vec<ContextId>,
    /// `(from, to)` when the asset strategy changed
    pub strategy_change: Option<(LoadStrategy, LoadStrategy)>,
    /// Draw calls recorded on all contexts since the previous tick
    pub draw_calls: u64,
}

/// Resource manager driven by the rendering loop
pub struct AdaptiveRuntime<B: ContextBackend, T: MemoryTelemetry> {
    contexts: ContextPoolManager<B>,
    monitor: PerformanceMonitor,
    quality: QualityController,
    telemetry: T,
    strategy: Option<StrategyHandle>,
    events: EventBus,
}

impl<B: ContextBackend, T: MemoryTelemetry> AdaptiveRuntime<B, T> {
    /// Build the runtime, seeding the quality tier from a benchmark
    pub fn new(config: &AnimaConfig, backend: B, telemetry: T, benchmark: &BenchmarkResult) -> Self {
        let events = EventBus::new(config.general.event_capacity);
        let quality = QualityController::from_benchmark(benchmark, &config.quality).with_events(events.clone());
        info!("🚀 Adaptive runtime ready at {} quality", quality.tier());

        Self {
            contexts: ContextPoolManager::new(backend, &config.pool).with_events(events.clone()),
            monitor: PerformanceMonitor::new(&config.monitor).with_events(events.clone()),
            quality,
            telemetry,
            strategy: None,
            events,
        }
    }

    /// Let pressure and network changes steer an asset scheduler
    pub fn attach_scheduler(&mut self, strategy: StrategyHandle) {
        debug!("🔗 Scheduler attached with {:?} strategy", strategy.current());
        self.strategy = Some(strategy);
    }

    /// Subscribe to every resource event
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    /// Publish the current tier so new subscribers can apply it
    pub fn announce_tier(&self) {
        self.quality.announce();
    }

    /// Feed one rendered frame
    pub fn tick(&mut self, frame_duration: Duration, now: Instant) -> TickReport {
        let frame = self.monitor.record_frame(frame_duration, now, self.quality.tier());
        let mut tier_changes: Vec<TierChange> = self.quality.observe_frame(frame_duration, now).into_iter().collect();
        let mut strategy_change = None;
        let mut cleanup = None;
        let mut memory = None;

        if self.monitor.memory_sample_due(now) {
            match self.telemetry.sample() {
                Some(snapshot) => {
                    let report = self.monitor.record_memory(snapshot, now);
                    if let Some(level) = report.changed {
                        tier_changes.extend(self.quality.on_memory_pressure(level, now));
                        strategy_change = self.steer_strategy(level);
                    }
                    if report.over_budget() {
                        cleanup = Some(self.contexts.perform_memory_cleanup());
                    }
                    memory = Some(report);
                }
                None => self.monitor.record_memory_unavailable(now),
            }
        }

        if cleanup.is_none() && self.contexts.memory_usage() > self.contexts.memory_budget() {
            cleanup = Some(self.contexts.perform_memory_cleanup());
        }

        TickReport {
            frame,
            tier_changes,
            memory,
            cleanup,
            dropped_contexts: self.contexts.drop_unrestored(now),
            strategy_change,
            draw_calls: self.contexts.take_draw_call_sample(),
        }
    }

    /// Record a connectivity change and resize asset batches to match
    pub fn on_network_change(&mut self, quality: NetworkQuality) -> Option<(LoadStrategy, LoadStrategy)> {
        if !self.monitor.record_network(quality) {
            return None;
        }
        if self.monitor.pressure() == PressureLevel::Critical {
            // Stay demoted until memory recovers
            return None;
        }
        let target = self.network_strategy()?;
        self.switch_strategy(target)
    }

    /// Destroy all contexts
    pub fn shutdown(&mut self) {
        self.contexts.cleanup_all();
        info!("👋 Adaptive runtime shut down");
    }

    pub fn contexts(&self) -> &ContextPoolManager<B> {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut ContextPoolManager<B> {
        &mut self.contexts
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn quality_mut(&mut self) -> &mut QualityController {
        &mut self.quality
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Strategy the network allows, never above the configured baseline
    fn network_strategy(&self) -> Option<LoadStrategy> {
        let handle = self.strategy.as_ref()?;
        let for_network = LoadStrategy::for_network(self.monitor.network());
        let baseline = handle.baseline();
        Some(if for_network.max_concurrent() < baseline.max_concurrent() {
            for_network
        } else {
            baseline
        })
    }

    fn steer_strategy(&mut self, level: PressureLevel) -> Option<(LoadStrategy, LoadStrategy)> {
        match level {
            PressureLevel::Critical => {
                let handle = self.strategy.as_ref()?;
                let target = handle.current().demoted();
                self.switch_strategy(target)
            }
            PressureLevel::Normal => {
                let target = self.network_strategy()?;
                self.switch_strategy(target)
            }
            PressureLevel::Warning => None,
        }
    }

    fn switch_strategy(&mut self, target: LoadStrategy) -> Option<(LoadStrategy, LoadStrategy)> {
        let handle = self.strategy.as_ref()?;
        let from = handle.set(target)?;
        self.events.publish(ResourceEvent::StrategyChanged { from, to: target });
        Some((from, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::ScoreSource;
    use crate::context::{ContextOptions, HeadlessBackend};
    use crate::monitor::{MemorySnapshot, StaticTelemetry};
    use crate::quality::QualityTier;

    const MB: u64 = 1024 * 1024;

    fn runtime(used_mb: u64) -> AdaptiveRuntime<HeadlessBackend, StaticTelemetry> {
        let benchmark = BenchmarkResult::new(70.0, 70.0, 70.0, ScoreSource::Live);
        AdaptiveRuntime::new(
            &AnimaConfig::default(),
            HeadlessBackend::new(64, 64),
            StaticTelemetry::new(Some(MemorySnapshot::new(used_mb * MB, 8192 * MB))),
            &benchmark,
        )
    }

    #[test]
    fn test_initial_tier_from_benchmark() {
        assert_eq!(runtime(10).quality().tier(), QualityTier::High);
    }

    #[test]
    fn test_memory_sampled_on_interval() {
        let mut runtime = runtime(10);
        let start = Instant::now();

        assert!(runtime.tick(Duration::from_millis(16), start).memory.is_some());
        assert!(runtime
            .tick(Duration::from_millis(16), start + Duration::from_millis(16))
            .memory
            .is_none());
        assert!(runtime
            .tick(Duration::from_millis(16), start + Duration::from_secs(1))
            .memory
            .is_some());
    }

    #[test]
    fn test_critical_pressure_drops_tier_and_demotes_strategy() {
        let mut runtime = runtime(10);
        let handle = StrategyHandle::new(LoadStrategy::Aggressive);
        runtime.attach_scheduler(handle.clone());
        let start = Instant::now();
        runtime.tick(Duration::from_millis(16), start);

        runtime.telemetry_mut().set_used(500 * MB);
        let report = runtime.tick(Duration::from_millis(16), start + Duration::from_secs(1));

        assert_eq!(runtime.quality().tier(), QualityTier::Minimal);
        assert_eq!(report.strategy_change, Some((LoadStrategy::Aggressive, LoadStrategy::Balanced)));
        assert_eq!(handle.current(), LoadStrategy::Balanced);

        runtime.telemetry_mut().set_used(10 * MB);
        let report = runtime.tick(Duration::from_millis(16), start + Duration::from_secs(2));
        assert_eq!(report.strategy_change, Some((LoadStrategy::Balanced, LoadStrategy::Aggressive)));
    }

    #[test]
    fn test_over_budget_memory_triggers_cleanup() {
        let mut runtime = runtime(10);
        for i in 0..4 {
            runtime
                .contexts_mut()
                .acquire(format!("surface-{}", i), ContextOptions::default());
        }

        runtime.telemetry_mut().set_used(600 * MB);
        let report = runtime.tick(Duration::from_millis(16), Instant::now());

        let cleanup = report.cleanup.unwrap();
        assert_eq!(cleanup.evicted.len(), 2);
        assert_eq!(runtime.contexts().live_count(), 2);
    }

    #[test]
    fn test_network_change_steers_strategy() {
        let mut runtime = runtime(10);
        let handle = StrategyHandle::new(LoadStrategy::Balanced);
        runtime.attach_scheduler(handle.clone());

        assert_eq!(
            runtime.on_network_change(NetworkQuality::Slow),
            Some((LoadStrategy::Balanced, LoadStrategy::Conservative))
        );
        // Fast network never exceeds the configured baseline
        assert_eq!(
            runtime.on_network_change(NetworkQuality::Fast),
            Some((LoadStrategy::Conservative, LoadStrategy::Balanced))
        );
        assert_eq!(runtime.on_network_change(NetworkQuality::Fast), None);
    }

    #[test]
    fn test_lost_context_dropped_by_tick() {
        let mut runtime = runtime(10);
        let id = runtime
            .contexts_mut()
            .acquire("main", ContextOptions::default())
            .context_id()
            .unwrap();
        let start = Instant::now();
        runtime.contexts_mut().mark_lost(id, start).unwrap();

        assert!(runtime.tick(Duration::from_millis(16), start).dropped_contexts.is_empty());
        let report = runtime.tick(Duration::from_millis(16), start + Duration::from_secs(6));
        assert_eq!(report.dropped_contexts, vec![id]);
    }
}
