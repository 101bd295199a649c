//! # Anima Adaptive Rendering Resource Manager
//!
//! Keeps a rendering application responsive across devices of very
//! different capability by pooling rendering contexts, picking a quality
//! tier from a startup benchmark, adapting that tier to the measured frame
//! rate and memory pressure, and loading assets under a memory budget.
//!
//! ## Architecture
//!
//! Anima is built on a modular architecture:
//! - `context`: Rendering context pool with budget-driven eviction and loss recovery
//! - `benchmark`: Startup capability benchmark (live probes or static estimate)
//! - `quality`: Quality tiers and the hysteresis tier controller
//! - `monitor`: Frame timing, memory pressure and network tracking
//! - `assets`: Budgeted, prioritized, single-flight asset scheduler
//! - `runtime`: Per-frame orchestration of all of the above
//! - `events`: Broadcast bus for resource events
//! - `config`: Configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anima::{AdaptiveRuntime, AnimaConfig, BenchmarkResult, HeadlessBackend, SystemMemoryTelemetry};
//! use std::time::{Duration, Instant};
//!
//! let config = AnimaConfig::default();
//! let benchmark = BenchmarkResult::estimated(60.0, 60.0, 60.0);
//! let mut runtime = AdaptiveRuntime::new(
//!     &config,
//!     HeadlessBackend::default(),
//!     SystemMemoryTelemetry::new(),
//!     &benchmark,
//! );
//! let report = runtime.tick(Duration::from_millis(16), Instant::now());
//! println!("tier: {}", runtime.quality().tier());
//! # let _ = report;
//! ```

pub mod assets;
pub mod benchmark;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod monitor;
pub mod quality;
pub mod runtime;

// Re-export main types for easy access
pub use assets::{AssetDescriptor, AssetPriority, AssetScheduler, AssetType, CacheKey, LoadStrategy};
pub use benchmark::{BenchmarkResult, CapabilityBenchmark};
pub use config::AnimaConfig;
pub use context::{ContextOptions, ContextPoolManager, HeadlessBackend};
pub use error::{AssetError, ContextError};
pub use events::{EventBus, ResourceEvent};
pub use monitor::{PerformanceMonitor, PressureLevel, SystemMemoryTelemetry};
pub use quality::{QualityController, QualitySettings, QualityTier};
pub use runtime::{AdaptiveRuntime, TickReport};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Anima
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
