//! Configuration management for Anima
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It combines settings for the context pool, the
//! capability benchmark, quality adaptation, performance monitoring
//! and asset scheduling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::assets::LoadStrategy;
use crate::benchmark::DeviceSpecs;
use crate::quality::QualityTier;

const MIB: u64 = 1024 * 1024;

/// Main configuration struct containing all Anima settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnimaConfig {
    /// General runtime settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Rendering context pool limits
    #[serde(default)]
    pub pool: PoolConfig,

    /// Capability benchmark settings
    #[serde(default)]
    pub benchmark: BenchmarkConfig,

    /// Quality tier adaptation
    #[serde(default)]
    pub quality: QualityConfig,

    /// Performance monitoring thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Asset scheduler budgets and retry policy
    #[serde(default)]
    pub assets: AssetConfig,
}

/// General runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,

    /// Capacity of the resource event bus (events kept per lagging subscriber)
    pub event_capacity: usize,
}

/// Rendering context pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on simultaneously live contexts
    pub max_contexts: usize,

    /// Maximum released contexts kept for reuse
    pub max_pooled: usize,

    /// Soft memory budget for all contexts (MiB)
    pub memory_budget_mb: u64,

    /// Treat the device as memory-constrained (no pooling, low-power contexts)
    pub memory_constrained: bool,

    /// How long a lost context may wait for a restore before being dropped (ms)
    pub restore_timeout_ms: u64,
}

/// Capability benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Run live probes (false = static estimate from declared specs)
    pub live_profiling: bool,

    /// Wall-clock budget for the whole benchmark (ms)
    pub max_duration_ms: u64,

    /// Iterations of the recursive CPU workload
    pub cpu_iterations: u32,

    /// Multiplier turning CPU iterations/second into a 0-100 score
    pub cpu_score_scale: f64,

    /// Frames rendered by the GPU probe
    pub gpu_frames: u32,

    /// Declared device specs used for the static estimate
    pub device: Option<DeviceSpecs>,
}

/// Quality tier adaptation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Below this rolling FPS the tier steps down
    pub min_fps: f32,

    /// Desired frame rate
    pub target_fps: f32,

    /// Above `target_fps * upgrade_factor` the tier steps up
    pub upgrade_factor: f32,

    /// Seconds a condition must persist before an adjustment fires
    pub adjustment_threshold_secs: f64,

    /// Number of frame samples in the rolling FPS average
    pub fps_window: usize,

    /// Enable closed-loop adjustment (memory overrides always apply)
    pub auto_adjust: bool,

    /// Tier restored by the caller, overriding the benchmark mapping
    pub preferred_tier: Option<QualityTier>,
}

/// Performance monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Age after which frame samples are evicted (seconds)
    pub sample_window_secs: f64,

    /// Number of recent samples in the rolling FPS
    pub fps_window: usize,

    /// Memory budget the sampled usage is compared against (MiB)
    pub memory_budget_mb: u64,

    /// Fraction of the budget that raises a warning
    pub warning_ratio: f64,

    /// Fraction of the budget that raises a critical event
    pub critical_ratio: f64,

    /// Interval between memory telemetry samples (ms)
    pub memory_sample_interval_ms: u64,

    /// Frame rate below which a frame-rate drop is reported
    pub min_fps: f32,
}

/// Asset scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetConfig {
    /// Total asset memory budget shared by all categories (MiB)
    pub total_budget_mb: u64,

    /// Split of the total budget between categories
    pub partition: BudgetPartition,

    /// Total attempts for a transiently failing load
    pub retry_attempts: u32,

    /// Base back-off between attempts (ms), multiplied by the attempt number
    pub retry_delay_ms: u64,

    /// Initial batching strategy
    pub strategy: LoadStrategy,
}

/// Fractions of the total asset budget per category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetPartition {
    pub textures: f64,
    pub models: f64,
    pub audio: f64,
    pub code: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            event_capacity: 256,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 8,
            max_pooled: 3,
            memory_budget_mb: 512,
            memory_constrained: false,
            restore_timeout_ms: 5_000,
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            live_profiling: true,
            max_duration_ms: 3_000,
            cpu_iterations: 200,
            cpu_score_scale: 0.05,
            gpu_frames: 60,
            device: None,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_fps: 30.0,
            target_fps: 60.0,
            upgrade_factor: 1.2,
            adjustment_threshold_secs: DEFAULT_ADJUSTMENT_THRESHOLD_SECS,
            fps_window: 10,
            auto_adjust: true,
            preferred_tier: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_window_secs: DEFAULT_SAMPLE_WINDOW_SECS,
            fps_window: 10,
            memory_budget_mb: 512,
            warning_ratio: 0.8,
            critical_ratio: 0.95,
            memory_sample_interval_ms: 1_000,
            min_fps: 30.0,
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            total_budget_mb: 256,
            partition: BudgetPartition::default(),
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            strategy: LoadStrategy::Balanced,
        }
    }
}

impl Default for BudgetPartition {
    fn default() -> Self {
        Self {
            textures: 0.5,
            models: 0.3,
            audio: 0.15,
            code: 0.05,
        }
    }
}

/// Longest accepted adjustment threshold or sample window
pub const MAX_WINDOW_SECS: f64 = 3600.0;

const DEFAULT_ADJUSTMENT_THRESHOLD_SECS: f64 = 5.0;
const DEFAULT_SAMPLE_WINDOW_SECS: f64 = 30.0;

fn within_window(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0 && secs <= MAX_WINDOW_SECS
}

/// Seconds as a `Duration`, falling back for values `validate` rejects
fn bounded_secs(secs: f64, fallback: f64) -> Duration {
    let secs = if within_window(secs) { secs } else { fallback };
    Duration::from_secs_f64(secs)
}

impl PoolConfig {
    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb * MIB
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_millis(self.restore_timeout_ms)
    }
}

impl BenchmarkConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl QualityConfig {
    pub fn adjustment_threshold(&self) -> Duration {
        bounded_secs(self.adjustment_threshold_secs, DEFAULT_ADJUSTMENT_THRESHOLD_SECS)
    }

    /// Rolling FPS above which an upgrade is considered
    pub fn upgrade_fps(&self) -> f32 {
        self.target_fps * self.upgrade_factor
    }
}

impl MonitorConfig {
    pub fn sample_window(&self) -> Duration {
        bounded_secs(self.sample_window_secs, DEFAULT_SAMPLE_WINDOW_SECS)
    }

    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb * MIB
    }

    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms)
    }
}

impl AssetConfig {
    pub fn total_budget_bytes(&self) -> u64 {
        self.total_budget_mb * MIB
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl BudgetPartition {
    pub fn total(&self) -> f64 {
        self.textures + self.models + self.audio + self.code
    }
}

impl AnimaConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let relative = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(relative)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: AnimaConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_contexts == 0 {
            anyhow::bail!("Invalid max_contexts: at least one context must be allowed");
        }

        if self.pool.memory_budget_mb == 0 {
            anyhow::bail!("Invalid pool memory_budget_mb: must be greater than zero");
        }

        if self.benchmark.gpu_frames == 0 || self.benchmark.cpu_iterations == 0 {
            anyhow::bail!("Invalid benchmark: gpu_frames and cpu_iterations must be non-zero");
        }

        if !(self.benchmark.cpu_score_scale.is_finite() && self.benchmark.cpu_score_scale > 0.0) {
            anyhow::bail!("Invalid cpu_score_scale: must be positive");
        }

        let quality = &self.quality;
        if !(quality.min_fps.is_finite() && quality.target_fps.is_finite())
            || quality.min_fps <= 0.0
            || quality.min_fps >= quality.target_fps
        {
            anyhow::bail!(
                "Invalid fps thresholds: min_fps ({}) must be positive and below target_fps ({})",
                quality.min_fps,
                quality.target_fps
            );
        }

        if !(quality.upgrade_factor.is_finite() && quality.upgrade_factor >= 1.0) {
            anyhow::bail!("Invalid upgrade_factor: must be at least 1.0");
        }

        if !within_window(quality.adjustment_threshold_secs) {
            anyhow::bail!(
                "Invalid adjustment_threshold_secs ({}): must be positive and at most {} seconds",
                quality.adjustment_threshold_secs,
                MAX_WINDOW_SECS
            );
        }

        if quality.fps_window == 0 || self.monitor.fps_window == 0 {
            anyhow::bail!("Invalid fps_window: must hold at least one sample");
        }

        let monitor = &self.monitor;
        if !within_window(monitor.sample_window_secs) {
            anyhow::bail!(
                "Invalid sample_window_secs ({}): must be positive and at most {} seconds",
                monitor.sample_window_secs,
                MAX_WINDOW_SECS
            );
        }

        if !(0.0 < monitor.warning_ratio
            && monitor.warning_ratio < monitor.critical_ratio
            && monitor.critical_ratio <= 1.0)
        {
            anyhow::bail!(
                "Invalid memory ratios: need 0 < warning ({}) < critical ({}) <= 1",
                monitor.warning_ratio,
                monitor.critical_ratio
            );
        }

        if self.assets.retry_attempts == 0 {
            anyhow::bail!("Invalid retry_attempts: at least one attempt is required");
        }

        let partition = &self.assets.partition;
        let shares = [partition.textures, partition.models, partition.audio, partition.code];
        if shares.iter().any(|share| !(0.0..=1.0).contains(share)) {
            anyhow::bail!("Invalid budget partition: every share must be between 0.0 and 1.0");
        }

        if partition.total() > 1.0 + 1e-6 {
            anyhow::bail!(
                "Invalid budget partition: shares sum to {:.3}, must not exceed 1.0",
                partition.total()
            );
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults override this config
    pub fn merge_partial(mut self, partial: AnimaConfig) -> Self {
        let default_config = AnimaConfig::default();

        if partial.general != default_config.general {
            self.general = partial.general;
        }
        if partial.pool != default_config.pool {
            self.pool = partial.pool;
        }
        if partial.benchmark != default_config.benchmark {
            self.benchmark = partial.benchmark;
        }
        if partial.quality != default_config.quality {
            self.quality = partial.quality;
        }
        if partial.monitor != default_config.monitor {
            self.monitor = partial.monitor;
        }
        if partial.assets != default_config.assets {
            self.assets = partial.assets;
        }

        self
    }
}


#[cfg(test)]
mod property_tests;
