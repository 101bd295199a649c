//! Performance monitoring
//!
//! Samples frame durations on every rendering tick into a time-boxed
//! window, samples memory through a `MemoryTelemetry` source, tracks the
//! effective network quality, and raises edge-triggered threshold events
//! (frame-rate drop, memory pressure changes).

mod telemetry;

pub use telemetry::{MemorySnapshot, MemoryTelemetry, StaticTelemetry, SystemMemoryTelemetry};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::events::{EventBus, ResourceEvent};
use crate::quality::QualityTier;

/// Memory pressure relative to the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Effective network quality reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Fast,
    Moderate,
    Slow,
    Offline,
}

/// One rendering tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub frame_duration_ms: f32,
    pub timestamp: Instant,
    /// Tier in effect when the frame was drawn
    pub tier: QualityTier,
}

/// Result of recording a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub sample: PerformanceSample,
    /// Rolling FPS once enough samples exist
    pub rolling_fps: Option<f32>,
    /// Rolling FPS just crossed below the minimum
    pub frame_rate_dropped: bool,
}

/// Result of recording a memory reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReport {
    pub snapshot: MemorySnapshot,
    /// Budget the reading was compared against
    pub budget_bytes: u64,
    pub level: PressureLevel,
    /// Set when the level differs from the previous reading
    pub changed: Option<PressureLevel>,
}

impl MemoryReport {
    pub fn over_budget(&self) -> bool {
        self.snapshot.used_bytes > self.budget_bytes
    }
}

/// Aggregated monitor statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStats {
    pub total_frames: u64,
    pub avg_frame_ms: f32,
    pub min_frame_ms: f32,
    pub max_frame_ms: f32,
    pub current_fps: f32,
    /// Frames slower than the minimum frame rate allows
    pub missed_frames: u64,
    pub peak_memory_bytes: u64,
    pub pressure_changes: u64,
    pub frame_rate_drops: u64,
}

/// Rolling frame and memory monitor
#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    samples: VecDeque<PerformanceSample>,
    pressure: PressureLevel,
    below_min_fps: bool,
    network: NetworkQuality,
    last_memory: Option<MemorySnapshot>,
    last_memory_sample_at: Option<Instant>,
    stats: MonitorStats,
    events: Option<EventBus>,
}

impl PerformanceMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        debug!(
            "📈 Performance monitor: {:?} window, {} MB budget",
            config.sample_window(),
            config.memory_budget_mb
        );
        Self {
            config: config.clone(),
            samples: VecDeque::new(),
            pressure: PressureLevel::Normal,
            below_min_fps: false,
            network: NetworkQuality::Fast,
            last_memory: None,
            last_memory_sample_at: None,
            stats: MonitorStats::default(),
            events: None,
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Record one frame and evict samples older than the window
    pub fn record_frame(&mut self, frame_duration: Duration, now: Instant, tier: QualityTier) -> FrameReport {
        let frame_ms = frame_duration.as_secs_f32() * 1000.0;
        let sample = PerformanceSample {
            frame_duration_ms: frame_ms,
            timestamp: now,
            tier,
        };

        self.samples.push_back(sample);
        let window = self.config.sample_window();
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.timestamp) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        self.update_frame_stats(frame_ms);

        let rolling_fps = self.rolling_fps();
        let mut frame_rate_dropped = false;
        if let Some(fps) = rolling_fps {
            self.stats.current_fps = fps;
            let below = fps < self.config.min_fps;
            if below && !self.below_min_fps {
                frame_rate_dropped = true;
                self.stats.frame_rate_drops += 1;
                warn!("🐢 Frame rate dropped to {:.1} fps (min {:.0})", fps, self.config.min_fps);
                self.publish(ResourceEvent::FrameRateDrop {
                    fps,
                    min_fps: self.config.min_fps,
                });
            }
            self.below_min_fps = below;
        }

        FrameReport {
            sample,
            rolling_fps,
            frame_rate_dropped,
        }
    }

    /// FPS over the most recent `fps_window` samples
    pub fn rolling_fps(&self) -> Option<f32> {
        let window = self.config.fps_window.max(1);
        if self.samples.len() < window {
            return None;
        }

        let total_ms: f32 = self
            .samples
            .iter()
            .rev()
            .take(window)
            .map(|sample| sample.frame_duration_ms)
            .sum();
        let avg_ms = total_ms / window as f32;
        if avg_ms <= 0.0 {
            return None;
        }
        Some(1000.0 / avg_ms)
    }

    /// Samples still inside the time window, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Whether the memory sampling interval has elapsed
    pub fn memory_sample_due(&self, now: Instant) -> bool {
        match self.last_memory_sample_at {
            Some(at) => now.saturating_duration_since(at) >= self.config.memory_sample_interval(),
            None => true,
        }
    }

    /// Record a memory reading and classify pressure
    ///
    /// The budget is the configured budget, or the reported limit when that
    /// is smaller. Events fire only when the level changes.
    pub fn record_memory(&mut self, snapshot: MemorySnapshot, now: Instant) -> MemoryReport {
        self.last_memory = Some(snapshot);
        self.last_memory_sample_at = Some(now);
        self.stats.peak_memory_bytes = self.stats.peak_memory_bytes.max(snapshot.used_bytes);

        let budget_bytes = match snapshot.limit_bytes {
            0 => self.config.memory_budget_bytes(),
            limit => limit.min(self.config.memory_budget_bytes()),
        };
        let level = self.classify(snapshot.used_bytes, budget_bytes);

        let changed = if level != self.pressure {
            let previous = self.pressure;
            self.pressure = level;
            self.stats.pressure_changes += 1;
            if level > previous {
                warn!(
                    "🧠 Memory pressure {:?} -> {:?} ({} / {} MB)",
                    previous,
                    level,
                    snapshot.used_bytes / (1024 * 1024),
                    budget_bytes / (1024 * 1024)
                );
            } else {
                info!("🧠 Memory pressure eased to {:?}", level);
            }
            self.publish(ResourceEvent::MemoryPressure {
                level,
                used_bytes: snapshot.used_bytes,
                budget_bytes,
            });
            Some(level)
        } else {
            None
        };

        MemoryReport {
            snapshot,
            budget_bytes,
            level,
            changed,
        }
    }

    /// Note that telemetry was polled but had nothing to report
    pub fn record_memory_unavailable(&mut self, now: Instant) {
        self.last_memory_sample_at = Some(now);
    }

    /// Record the network quality; returns true when it changed
    pub fn record_network(&mut self, quality: NetworkQuality) -> bool {
        if quality == self.network {
            return false;
        }
        info!("📶 Network quality {:?} -> {:?}", self.network, quality);
        self.network = quality;
        self.publish(ResourceEvent::NetworkChanged { quality });
        true
    }

    pub fn network(&self) -> NetworkQuality {
        self.network
    }

    pub fn pressure(&self) -> PressureLevel {
        self.pressure
    }

    pub fn last_memory(&self) -> Option<MemorySnapshot> {
        self.last_memory
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    fn classify(&self, used_bytes: u64, budget_bytes: u64) -> PressureLevel {
        if budget_bytes == 0 {
            return PressureLevel::Critical;
        }
        let ratio = used_bytes as f64 / budget_bytes as f64;
        if ratio >= self.config.critical_ratio {
            PressureLevel::Critical
        } else if ratio >= self.config.warning_ratio {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    fn update_frame_stats(&mut self, frame_ms: f32) {
        let stats = &mut self.stats;
        stats.total_frames += 1;
        if stats.total_frames == 1 {
            stats.min_frame_ms = frame_ms;
            stats.max_frame_ms = frame_ms;
            stats.avg_frame_ms = frame_ms;
        } else {
            stats.min_frame_ms = stats.min_frame_ms.min(frame_ms);
            stats.max_frame_ms = stats.max_frame_ms.max(frame_ms);
            // Running mean over the whole session
            stats.avg_frame_ms += (frame_ms - stats.avg_frame_ms) / stats.total_frames as f32;
        }

        if self.config.min_fps > 0.0 && frame_ms > 1000.0 / self.config.min_fps {
            stats.missed_frames += 1;
        }
    }

    fn publish(&self, event: ResourceEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
