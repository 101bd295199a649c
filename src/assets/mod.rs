//! Budgeted, prioritized asset loading
//!
//! Descriptors are admitted against a per-category memory budget, queued
//! by priority and loaded in bounded batches with retry. Every key is
//! loaded at most once at a time; requests for a key already loading
//! attach to the in-flight task.

mod budget;
mod loader;
mod scheduler;

pub use budget::{AssetBudget, BudgetCategory};
pub use loader::{AssetFetcher, AssetManifest, FetchError, FileFetcher, ManifestEntry};
pub use scheduler::{
    AssetScheduler, DrainReport, LoadStrategy, LoadTicket, SchedulerStats, StrategyHandle, TaskOutcome,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fixed footprint assumed for shaders, scripts and stylesheets
const CODE_ESTIMATE_BYTES: u64 = 64 * 1024;

/// Closed set of asset kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetType {
    Image,
    Model,
    ShaderSource,
    Audio,
    Script,
    Style,
}

impl AssetType {
    /// Budget partition charged for this type
    pub fn category(self) -> BudgetCategory {
        match self {
            AssetType::Image => BudgetCategory::Textures,
            AssetType::Model => BudgetCategory::Models,
            AssetType::Audio => BudgetCategory::Audio,
            AssetType::ShaderSource | AssetType::Script | AssetType::Style => BudgetCategory::Code,
        }
    }

    /// Priority used when a descriptor does not set one
    pub fn default_priority(self) -> AssetPriority {
        match self {
            AssetType::ShaderSource | AssetType::Style => AssetPriority::High,
            AssetType::Image | AssetType::Model | AssetType::Script => AssetPriority::Normal,
            AssetType::Audio => AssetPriority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Image => "image",
            AssetType::Model => "model",
            AssetType::ShaderSource => "shader-source",
            AssetType::Audio => "audio",
            AssetType::Script => "script",
            AssetType::Style => "style",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load priority; higher loads first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    /// Speculative loads, skipped entirely by the conservative strategy
    Preload,
}

impl AssetPriority {
    pub fn weight(self) -> i8 {
        match self {
            AssetPriority::Critical => 3,
            AssetPriority::High => 2,
            AssetPriority::Normal => 1,
            AssetPriority::Low => 0,
            AssetPriority::Preload => -1,
        }
    }
}

impl PartialOrd for AssetPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AssetPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight().cmp(&other.weight())
    }
}

/// Type-specific inputs of the footprint estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SizeHint {
    Image { width: u32, height: u32, bytes_per_pixel: u32 },
    Mesh { vertex_count: u64, stride: u32 },
    Audio { duration_secs: f64, sample_rate: u32, channels: u16, bytes_per_sample: u16 },
    Bytes { bytes: u64 },
}

impl SizeHint {
    pub fn bytes(self) -> u64 {
        match self {
            SizeHint::Image {
                width,
                height,
                bytes_per_pixel,
            } => u64::from(width)
                .saturating_mul(u64::from(height))
                .saturating_mul(u64::from(bytes_per_pixel)),
            SizeHint::Mesh { vertex_count, stride } => vertex_count.saturating_mul(u64::from(stride)),
            SizeHint::Audio {
                duration_secs,
                sample_rate,
                channels,
                bytes_per_sample,
            } => {
                // Float-to-int casts saturate; NaN becomes zero
                let frames = (duration_secs.max(0.0) * f64::from(sample_rate)).ceil() as u64;
                frames
                    .saturating_mul(u64::from(channels))
                    .saturating_mul(u64::from(bytes_per_sample))
            }
            SizeHint::Bytes { bytes } => bytes,
        }
    }
}

/// Request to load one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub asset_type: AssetType,
    pub url: String,
    #[serde(default)]
    pub version: Option<String>,
    pub priority: AssetPriority,
    /// Caller-supplied estimate, used when no size hint is given
    #[serde(default)]
    pub estimated_size_bytes: Option<u64>,
    #[serde(default)]
    pub size_hint: Option<SizeHint>,
    /// Survives `clear_cache`
    #[serde(default)]
    pub persistent: bool,
}

impl AssetDescriptor {
    pub fn new(asset_type: AssetType, url: impl Into<String>) -> Self {
        Self {
            asset_type,
            url: url.into(),
            version: None,
            priority: asset_type.default_priority(),
            estimated_size_bytes: None,
            size_hint: None,
            persistent: false,
        }
    }

    pub fn image(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(AssetType::Image, url).with_size_hint(SizeHint::Image {
            width,
            height,
            bytes_per_pixel: 4,
        })
    }

    pub fn model(url: impl Into<String>, vertex_count: u64, stride: u32) -> Self {
        Self::new(AssetType::Model, url).with_size_hint(SizeHint::Mesh { vertex_count, stride })
    }

    pub fn audio(url: impl Into<String>, duration_secs: f64) -> Self {
        Self::new(AssetType::Audio, url).with_size_hint(SizeHint::Audio {
            duration_secs,
            sample_rate: 44_100,
            channels: 2,
            bytes_per_sample: 2,
        })
    }

    pub fn with_priority(mut self, priority: AssetPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_size_hint(mut self, hint: SizeHint) -> Self {
        self.size_hint = Some(hint);
        self
    }

    pub fn with_estimated_size(mut self, bytes: u64) -> Self {
        self.estimated_size_bytes = Some(bytes);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            asset_type: self.asset_type,
            url: self.url.clone(),
            version: self.version.clone(),
        }
    }

    /// Bytes charged against the category budget
    pub fn estimated_footprint(&self) -> u64 {
        match (self.asset_type, self.size_hint, self.estimated_size_bytes) {
            (AssetType::ShaderSource | AssetType::Script | AssetType::Style, None, None) => CODE_ESTIMATE_BYTES,
            (_, Some(hint), _) => hint.bytes(),
            (_, None, Some(bytes)) => bytes,
            (_, None, None) => 0,
        }
    }
}

/// Identity of a cached asset: `(type, url, version)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub asset_type: AssetType,
    pub url: String,
    pub version: Option<String>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}@{}", self.asset_type, self.url, version),
            None => write!(f, "{}:{}", self.asset_type, self.url),
        }
    }
}

/// Load state of a task or cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Queued,
    Loading,
    Loaded,
    Failed,
}

/// Bytes of a loaded asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPayload {
    pub key: CacheKey,
    pub bytes: Vec<u8>,
    /// Bytes charged against the budget for this asset
    pub charged_bytes: u64,
}

/// A queued or running load
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub descriptor: AssetDescriptor,
    pub state: LoadState,
    /// Attempt in progress or last made; zero while queued
    pub attempt: u32,
    /// Message of the most recent failed attempt
    pub last_error: Option<String>,
}

impl LoadTask {
    fn new(descriptor: AssetDescriptor) -> Self {
        Self {
            descriptor,
            state: LoadState::Queued,
            attempt: 0,
            last_error: None,
        }
    }
}

/// A settled cache slot
#[derive(Debug, Clone)]
pub struct AssetCacheEntry {
    pub key: CacheKey,
    pub state: LoadState,
    pub payload: Option<Arc<AssetPayload>>,
    /// Fetch attempts made by the load that settled this entry
    pub attempts: u32,
    /// Final error of a failed entry
    pub error: Option<String>,
    /// Most recent failed attempt, also kept when a retry succeeded
    pub last_error: Option<String>,
    pub persistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![
            AssetPriority::Low,
            AssetPriority::Preload,
            AssetPriority::Critical,
            AssetPriority::Normal,
            AssetPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                AssetPriority::Preload,
                AssetPriority::Low,
                AssetPriority::Normal,
                AssetPriority::High,
                AssetPriority::Critical,
            ]
        );
    }

    #[test]
    fn test_footprint_formulas() {
        assert_eq!(AssetDescriptor::image("a.png", 1024, 1024).estimated_footprint(), 4 * 1024 * 1024);
        assert_eq!(AssetDescriptor::model("m.glb", 10_000, 32).estimated_footprint(), 320_000);
        assert_eq!(AssetDescriptor::audio("a.ogg", 1.0).estimated_footprint(), 44_100 * 4);
        assert_eq!(
            AssetDescriptor::new(AssetType::ShaderSource, "s.wgsl").estimated_footprint(),
            CODE_ESTIMATE_BYTES
        );
        assert_eq!(
            AssetDescriptor::new(AssetType::Script, "s.js")
                .with_estimated_size(10)
                .estimated_footprint(),
            10
        );
    }

    #[test]
    fn test_oversized_hints_saturate() {
        assert_eq!(AssetDescriptor::model("huge.glb", u64::MAX, 64).estimated_footprint(), u64::MAX);
        let endless = AssetDescriptor::new(AssetType::Audio, "endless.ogg").with_size_hint(SizeHint::Audio {
            duration_secs: f64::INFINITY,
            sample_rate: 48_000,
            channels: 8,
            bytes_per_sample: 4,
        });
        assert_eq!(endless.estimated_footprint(), u64::MAX);
    }

    #[test]
    fn test_categories() {
        assert_eq!(AssetType::Image.category(), BudgetCategory::Textures);
        assert_eq!(AssetType::Model.category(), BudgetCategory::Models);
        assert_eq!(AssetType::Audio.category(), BudgetCategory::Audio);
        assert_eq!(AssetType::Style.category(), BudgetCategory::Code);
    }

    #[test]
    fn test_cache_key_identity() {
        let a = AssetDescriptor::image("hero.png", 8, 8).with_version("2");
        let b = AssetDescriptor::image("hero.png", 16, 16)
            .with_version("2")
            .with_priority(AssetPriority::Critical);

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), AssetDescriptor::image("hero.png", 8, 8).key());
        assert_eq!(a.key().to_string(), "image:hero.png@2");
    }
}
