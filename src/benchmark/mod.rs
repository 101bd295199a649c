//! Device capability benchmark
//!
//! Scores the device once per process on three axes (CPU, GPU, memory)
//! and averages them into the overall score that seeds the quality tier.
//! When live probing is disabled, or a probe cannot measure anything, the
//! score falls back to a deterministic estimate from the declared
//! `DeviceSpecs`. The benchmark never fails and never overruns its budget.

mod probes;

pub use probes::{
    cpu_probe, gpu_probe, memory_probe, FrameProbe, ProbeError, ProbeScore, SoftwareFrameProbe,
    SyntheticFrameProbe,
};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};
use sysinfo::System;

use crate::config::BenchmarkConfig;
use crate::monitor::MemoryTelemetry;
use crate::quality::QualityTier;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Share of the time budget given to the CPU probe
const CPU_BUDGET_SHARE: u32 = 3;

/// How a score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// Every probe completed
    Live,
    /// At least one probe was cut short or replaced by the estimate
    Partial,
    /// Static estimate from device specs
    Estimated,
}

/// Outcome of a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub cpu_score: f64,
    pub gpu_score: f64,
    pub memory_score: f64,
    /// Mean of the three axis scores
    pub overall_score: f64,
    pub measured_at: SystemTime,
    pub source: ScoreSource,
}

impl BenchmarkResult {
    pub fn new(cpu_score: f64, gpu_score: f64, memory_score: f64, source: ScoreSource) -> Self {
        let clamp = |score: f64| score.clamp(0.0, 100.0);
        let (cpu_score, gpu_score, memory_score) = (clamp(cpu_score), clamp(gpu_score), clamp(memory_score));
        Self {
            cpu_score,
            gpu_score,
            memory_score,
            overall_score: (cpu_score + gpu_score + memory_score) / 3.0,
            measured_at: SystemTime::now(),
            source,
        }
    }

    pub fn estimated(cpu_score: f64, gpu_score: f64, memory_score: f64) -> Self {
        Self::new(cpu_score, gpu_score, memory_score, ScoreSource::Estimated)
    }

    /// Tier suggested by the overall score
    pub fn initial_tier(&self) -> QualityTier {
        QualityTier::from_score(self.overall_score)
    }
}

/// Broad form factor of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Laptop,
    Tablet,
    Phone,
}

impl DeviceClass {
    /// Sustained-performance factor (thermal and power limits)
    pub fn factor(self) -> f64 {
        match self {
            DeviceClass::Desktop => 1.0,
            DeviceClass::Laptop => 0.85,
            DeviceClass::Tablet => 0.65,
            DeviceClass::Phone => 0.5,
        }
    }
}

/// Declared hardware description used by the static estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpecs {
    pub cores: u32,
    pub memory_gb: f64,
    #[serde(default)]
    pub class: DeviceClass,
    #[serde(default)]
    pub gpu_vendor: Option<String>,
}

impl DeviceSpecs {
    /// Read core count and memory of this host
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_all();

        let specs = Self {
            cores: u32::try_from(system.cpus().len()).unwrap_or(u32::MAX).max(1),
            memory_gb: system.total_memory() as f64 / BYTES_PER_GB,
            class: DeviceClass::Desktop,
            gpu_vendor: None,
        };
        debug!("🔍 Detected {} cores, {:.1} GB memory", specs.cores, specs.memory_gb);
        specs
    }

    /// Score a GPU from its vendor or renderer string
    pub fn gpu_vendor_score(vendor: Option<&str>) -> f64 {
        let Some(vendor) = vendor else {
            return 40.0;
        };
        let vendor = vendor.to_ascii_lowercase();
        let matches_any = |needles: &[&str]| needles.iter().any(|needle| vendor.contains(needle));

        if matches_any(&["swiftshader", "llvmpipe", "software"]) {
            10.0
        } else if matches_any(&["nvidia", "geforce", "amd", "radeon"]) {
            85.0
        } else if matches_any(&["apple"]) {
            80.0
        } else if matches_any(&["intel"]) {
            50.0
        } else if matches_any(&["adreno", "mali", "powervr"]) {
            35.0
        } else {
            40.0
        }
    }

    /// Deterministic 0-100 estimate from the declared specs
    pub fn estimate(&self) -> BenchmarkResult {
        let factor = self.class.factor();
        let cpu = (f64::from(self.cores) * 12.5).min(100.0) * factor;
        let gpu = Self::gpu_vendor_score(self.gpu_vendor.as_deref()) * factor;
        let memory = (self.memory_gb * 12.5).min(100.0);
        BenchmarkResult::estimated(cpu, gpu, memory)
    }
}

/// Runs the probes once and caches the result
#[derive(Debug)]
pub struct CapabilityBenchmark {
    config: BenchmarkConfig,
    specs: DeviceSpecs,
    cached: Option<BenchmarkResult>,
}

impl CapabilityBenchmark {
    /// Benchmark using the configured specs, or the detected host
    pub fn new(config: &BenchmarkConfig) -> Self {
        let specs = config.device.clone().unwrap_or_else(DeviceSpecs::detect);
        Self::with_specs(config, specs)
    }

    pub fn with_specs(config: &BenchmarkConfig, specs: DeviceSpecs) -> Self {
        Self {
            config: config.clone(),
            specs,
            cached: None,
        }
    }

    pub fn specs(&self) -> &DeviceSpecs {
        &self.specs
    }

    /// Static estimate without running any probe
    pub fn estimate(&self) -> BenchmarkResult {
        self.specs.estimate()
    }

    /// Cached result of a previous run
    pub fn cached(&self) -> Option<&BenchmarkResult> {
        self.cached.as_ref()
    }

    /// Forget the cached result so the next run probes again
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// Run the benchmark, or return the cached result
    pub async fn run<P, T>(&mut self, frames: &mut P, telemetry: &mut T) -> BenchmarkResult
    where
        P: FrameProbe,
        T: MemoryTelemetry + ?Sized,
    {
        if let Some(cached) = &self.cached {
            debug!("📋 Reusing benchmark from {:?}", cached.measured_at);
            return cached.clone();
        }

        let result = if self.config.live_profiling {
            self.run_live(frames, telemetry).await
        } else {
            info!("📐 Live profiling disabled, estimating from device specs");
            self.estimate()
        };

        info!(
            "🏁 Benchmark: cpu {:.1}, gpu {:.1}, memory {:.1}, overall {:.1} ({:?})",
            result.cpu_score, result.gpu_score, result.memory_score, result.overall_score, result.source
        );
        self.cached = Some(result.clone());
        result
    }

    async fn run_live<P, T>(&self, frames: &mut P, telemetry: &mut T) -> BenchmarkResult
    where
        P: FrameProbe,
        T: MemoryTelemetry + ?Sized,
    {
        let budget = self.config.max_duration();
        let started = Instant::now();
        let estimate = self.estimate();

        let cpu = cpu_probe(
            self.config.cpu_iterations,
            self.config.cpu_score_scale,
            started + budget / CPU_BUDGET_SHARE,
        );
        let memory = memory_probe(telemetry);
        let remaining = budget.saturating_sub(started.elapsed());
        let gpu = gpu_probe(frames, self.config.gpu_frames, remaining).await;

        let complete = cpu.complete && gpu.complete && memory.complete;
        BenchmarkResult::new(
            cpu.score.unwrap_or(estimate.cpu_score),
            gpu.score.unwrap_or(estimate.gpu_score),
            memory.score.unwrap_or(estimate.memory_score),
            if complete { ScoreSource::Live } else { ScoreSource::Partial },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MemorySnapshot, StaticTelemetry};
    use std::time::Duration;

    fn phone() -> DeviceSpecs {
        DeviceSpecs {
            cores: 8,
            memory_gb: 4.0,
            class: DeviceClass::Phone,
            gpu_vendor: Some("Qualcomm Adreno 640".to_string()),
        }
    }

    #[test]
    fn test_overall_is_mean() {
        let result = BenchmarkResult::new(90.0, 60.0, 30.0, ScoreSource::Live);
        assert!((result.overall_score - 60.0).abs() < 1e-9);
        assert_eq!(result.initial_tier(), QualityTier::Medium);

        let clamped = BenchmarkResult::new(250.0, -5.0, 100.0, ScoreSource::Live);
        assert_eq!(clamped.cpu_score, 100.0);
        assert_eq!(clamped.gpu_score, 0.0);
    }

    #[test]
    fn test_vendor_heuristics() {
        assert_eq!(DeviceSpecs::gpu_vendor_score(Some("NVIDIA GeForce RTX 3070")), 85.0);
        assert_eq!(DeviceSpecs::gpu_vendor_score(Some("Apple M2")), 80.0);
        assert_eq!(DeviceSpecs::gpu_vendor_score(Some("Intel(R) UHD Graphics 620")), 50.0);
        assert_eq!(DeviceSpecs::gpu_vendor_score(Some("Mali-G78")), 35.0);
        assert_eq!(DeviceSpecs::gpu_vendor_score(Some("Google SwiftShader")), 10.0);
        assert_eq!(DeviceSpecs::gpu_vendor_score(None), 40.0);
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let first = phone().estimate();
        let second = phone().estimate();

        assert_eq!(first.overall_score, second.overall_score);
        assert_eq!(first.source, ScoreSource::Estimated);
        // cpu 100 * 0.5, gpu 35 * 0.5, memory 50
        assert!((first.cpu_score - 50.0).abs() < 1e-9);
        assert!((first.gpu_score - 17.5).abs() < 1e-9);
        assert!((first.memory_score - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_profiling_uses_estimate() {
        let config = BenchmarkConfig {
            live_profiling: false,
            ..BenchmarkConfig::default()
        };
        let mut benchmark = CapabilityBenchmark::with_specs(&config, phone());
        let mut probe = SyntheticFrameProbe::new(Duration::from_millis(1));
        let mut telemetry = StaticTelemetry::unavailable();

        let result = benchmark.run(&mut probe, &mut telemetry).await;
        assert_eq!(result.source, ScoreSource::Estimated);
        assert_eq!(probe.frames_rendered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_run_is_cached_until_reset() {
        let config = BenchmarkConfig {
            cpu_iterations: 3,
            gpu_frames: 10,
            ..BenchmarkConfig::default()
        };
        let mut benchmark = CapabilityBenchmark::with_specs(&config, phone());
        let mut probe = SyntheticFrameProbe::new(Duration::from_millis(10));
        let mut telemetry = StaticTelemetry::new(Some(MemorySnapshot::new(1, 4)));

        let first = benchmark.run(&mut probe, &mut telemetry).await;
        assert!((first.memory_score - 75.0).abs() < 1e-9);
        let second = benchmark.run(&mut probe, &mut telemetry).await;
        assert_eq!(first, second);
        assert_eq!(probe.frames_rendered(), 10);

        benchmark.reset();
        assert!(benchmark.cached().is_none());
        benchmark.run(&mut probe, &mut telemetry).await;
        assert_eq!(probe.frames_rendered(), 20);
    }

    #[tokio::test]
    async fn test_missing_telemetry_falls_back_to_estimate() {
        let config = BenchmarkConfig {
            cpu_iterations: 2,
            gpu_frames: 2,
            ..BenchmarkConfig::default()
        };
        let mut benchmark = CapabilityBenchmark::with_specs(&config, phone());
        let mut probe = SyntheticFrameProbe::new(Duration::from_millis(1));

        let result = benchmark.run(&mut probe, &mut StaticTelemetry::unavailable()).await;
        assert_eq!(result.source, ScoreSource::Partial);
        assert!((result.memory_score - 50.0).abs() < 1e-9);
    }
}
