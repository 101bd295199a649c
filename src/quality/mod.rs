//! Closed-loop quality tier control
//!
//! The controller starts from the tier the capability benchmark suggests
//! and then follows the rolling frame rate. A move needs the average to
//! stay outside the `[min_fps, target_fps * upgrade_factor]` band for a
//! full adjustment threshold; a dip that recovers before the deadline
//! changes nothing. Memory pressure bypasses the timer.

mod preset;

pub use preset::{ParseTierError, PostProcessing, QualityPreset, QualitySettings, QualityTier, ShadowQuality};

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::benchmark::BenchmarkResult;
use crate::config::QualityConfig;
use crate::events::{EventBus, ResourceEvent};
use crate::monitor::PressureLevel;

/// Why the tier changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierChangeReason {
    Initial,
    LowFrameRate,
    HighFrameRate,
    MemoryWarning,
    MemoryCritical,
    Manual,
}

/// A recorded tier transition
#[derive(Debug, Clone, PartialEq)]
pub struct TierChange {
    pub from: QualityTier,
    pub to: QualityTier,
    pub reason: TierChangeReason,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
struct PendingAdjustment {
    direction: Direction,
    deadline: Instant,
}

/// Tier state machine driven by frame samples and memory pressure
#[derive(Debug)]
pub struct QualityController {
    config: QualityConfig,
    tier: QualityTier,
    fps_samples: VecDeque<f32>,
    pending: Option<PendingAdjustment>,
    history: Vec<TierChange>,
    events: Option<EventBus>,
}

impl QualityController {
    pub fn new(initial: QualityTier, config: &QualityConfig) -> Self {
        info!("🎚️ Quality controller starting at {}", initial);
        Self {
            config: config.clone(),
            tier: initial,
            fps_samples: VecDeque::with_capacity(config.fps_window),
            pending: None,
            history: vec![TierChange {
                from: initial,
                to: initial,
                reason: TierChangeReason::Initial,
                at: Instant::now(),
            }],
            events: None,
        }
    }

    /// Seed the initial tier from a benchmark, unless a preferred tier is configured
    pub fn from_benchmark(result: &BenchmarkResult, config: &QualityConfig) -> Self {
        let tier = config
            .preferred_tier
            .unwrap_or_else(|| QualityTier::from_score(result.overall_score));
        debug!(
            "📊 Overall score {:.1} maps to {} (preferred: {:?})",
            result.overall_score,
            QualityTier::from_score(result.overall_score),
            config.preferred_tier
        );
        Self::new(tier, config)
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Publish the current tier so subscribers can apply its settings
    pub fn announce(&self) {
        self.publish(self.tier, self.tier, TierChangeReason::Initial);
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    pub fn settings(&self) -> QualitySettings {
        self.tier.settings()
    }

    /// Every transition so far, starting with the initial tier
    pub fn history(&self) -> &[TierChange] {
        &self.history
    }

    /// Rolling average FPS, once the window is full
    pub fn rolling_fps(&self) -> Option<f32> {
        if self.fps_samples.len() < self.config.fps_window.max(1) {
            return None;
        }
        Some(self.fps_samples.iter().sum::<f32>() / self.fps_samples.len() as f32)
    }

    /// Deadline of the armed adjustment, if any
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.deadline)
    }

    pub fn set_auto_adjust(&mut self, enabled: bool) {
        self.config.auto_adjust = enabled;
        if !enabled {
            self.pending = None;
        }
    }

    /// Feed one frame; returns a change if the armed adjustment fired
    pub fn observe_frame(&mut self, frame_duration: Duration, now: Instant) -> Option<TierChange> {
        let seconds = frame_duration.as_secs_f32().max(f32::EPSILON);
        self.fps_samples.push_back(1.0 / seconds);
        while self.fps_samples.len() > self.config.fps_window.max(1) {
            self.fps_samples.pop_front();
        }

        if !self.config.auto_adjust {
            return None;
        }

        self.update_pending(now);
        self.poll(now)
    }

    /// Fire the armed adjustment if its deadline has passed
    ///
    /// The condition is re-checked at fire time and the tier moves at most
    /// one rung.
    pub fn poll(&mut self, now: Instant) -> Option<TierChange> {
        let pending = self.pending?;
        if now < pending.deadline {
            return None;
        }
        self.pending = None;

        let average = self.rolling_fps()?;
        if self.wanted_direction(average) != Some(pending.direction) {
            return None;
        }

        let (target, reason) = match pending.direction {
            Direction::Down => (self.tier.step_down()?, TierChangeReason::LowFrameRate),
            Direction::Up => (self.tier.step_up()?, TierChangeReason::HighFrameRate),
        };
        debug!("⏱️ Adjustment fired at {:.1} fps", average);
        Some(self.apply(target, reason, now))
    }

    /// React to a memory pressure signal; never waits for the timer
    pub fn on_memory_pressure(&mut self, level: PressureLevel, now: Instant) -> Option<TierChange> {
        match level {
            PressureLevel::Normal => None,
            PressureLevel::Warning => {
                let target = self.tier.step_down()?;
                Some(self.apply(target, TierChangeReason::MemoryWarning, now))
            }
            PressureLevel::Critical => {
                if self.tier == QualityTier::Minimal {
                    self.pending = None;
                    return None;
                }
                warn!("🔥 Critical memory pressure, dropping to minimal quality");
                Some(self.apply(QualityTier::Minimal, TierChangeReason::MemoryCritical, now))
            }
        }
    }

    /// Set the tier directly, e.g. to restore a saved user preference
    pub fn force_tier(&mut self, tier: QualityTier, now: Instant) -> Option<TierChange> {
        if tier == self.tier {
            return None;
        }
        Some(self.apply(tier, TierChangeReason::Manual, now))
    }

    fn wanted_direction(&self, average: f32) -> Option<Direction> {
        if average < self.config.min_fps && self.tier > QualityTier::Minimal {
            Some(Direction::Down)
        } else if average > self.config.upgrade_fps() && self.tier < QualityTier::Ultra {
            Some(Direction::Up)
        } else {
            None
        }
    }

    fn update_pending(&mut self, now: Instant) {
        let Some(average) = self.rolling_fps() else {
            return;
        };

        match (self.wanted_direction(average), self.pending) {
            (None, Some(_)) => {
                debug!("🔕 Frame rate back in band ({:.1} fps), adjustment cancelled", average);
                self.pending = None;
            }
            (None, None) => {}
            (Some(direction), Some(pending)) if pending.direction == direction => {}
            (Some(direction), _) => {
                let deadline = now + self.config.adjustment_threshold();
                debug!(
                    "⏲️ Armed {:?} adjustment at {:.1} fps, fires in {:?}",
                    direction,
                    average,
                    self.config.adjustment_threshold()
                );
                self.pending = Some(PendingAdjustment { direction, deadline });
            }
        }
    }

    fn apply(&mut self, to: QualityTier, reason: TierChangeReason, now: Instant) -> TierChange {
        let from = self.tier;
        self.tier = to;
        self.pending = None;
        self.fps_samples.clear();

        info!("🎨 Quality {} -> {} ({:?})", from, to, reason);
        let change = TierChange { from, to, reason, at: now };
        self.history.push(change.clone());
        self.publish(from, to, reason);
        change
    }

    fn publish(&self, from: QualityTier, to: QualityTier, reason: TierChangeReason) {
        if let Some(bus) = &self.events {
            bus.publish(ResourceEvent::TierChanged {
                from,
                to,
                reason,
                settings: to.settings(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn feed(controller: &mut QualityController, start: Instant, ms: u64, count: u64) -> Vec<TierChange> {
        (0..count)
            .filter_map(|i| controller.observe_frame(frame_ms(ms), start + frame_ms(ms * (i + 1))))
            .collect()
    }

    #[test]
    fn test_no_decision_before_window_is_full() {
        let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
        let start = Instant::now();
        feed(&mut controller, start, 50, 9);

        assert_eq!(controller.rolling_fps(), None);
        assert!(controller.pending_deadline().is_none());
    }

    #[test]
    fn test_sustained_low_fps_steps_down_once() {
        let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
        let start = Instant::now();
        let changes = feed(&mut controller, start, 50, 120);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, QualityTier::High);
        assert_eq!(changes[0].to, QualityTier::Medium);
        assert_eq!(changes[0].reason, TierChangeReason::LowFrameRate);
    }

    #[test]
    fn test_high_fps_steps_up() {
        let mut controller = QualityController::new(QualityTier::Low, &QualityConfig::default());
        let start = Instant::now();
        // 10 ms frames are 100 fps, above 72
        let changes = feed(&mut controller, start, 10, 520);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, QualityTier::Medium);
        assert_eq!(changes[0].reason, TierChangeReason::HighFrameRate);
    }

    #[test]
    fn test_in_band_cancels_pending() {
        let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
        let start = Instant::now();
        feed(&mut controller, start, 50, 10);
        assert!(controller.pending_deadline().is_some());

        // 16 ms frames (62.5 fps) pull the average back into band
        let later = start + Duration::from_millis(500);
        feed(&mut controller, later, 16, 10);
        assert!(controller.pending_deadline().is_none());
    }

    #[test]
    fn test_auto_adjust_disabled_keeps_tier() {
        let config = QualityConfig {
            auto_adjust: false,
            ..QualityConfig::default()
        };
        let mut controller = QualityController::new(QualityTier::High, &config);
        let changes = feed(&mut controller, Instant::now(), 50, 200);

        assert!(changes.is_empty());
        assert_eq!(controller.tier(), QualityTier::High);
    }

    #[test]
    fn test_memory_warning_steps_down_and_critical_drops_to_floor() {
        let mut controller = QualityController::new(QualityTier::Ultra, &QualityConfig::default());
        let now = Instant::now();

        let change = controller.on_memory_pressure(PressureLevel::Warning, now).unwrap();
        assert_eq!(change.to, QualityTier::High);

        let change = controller.on_memory_pressure(PressureLevel::Critical, now).unwrap();
        assert_eq!(change.to, QualityTier::Minimal);
        assert_eq!(change.reason, TierChangeReason::MemoryCritical);

        assert!(controller.on_memory_pressure(PressureLevel::Warning, now).is_none());
        assert!(controller.on_memory_pressure(PressureLevel::Normal, now).is_none());
    }

    #[test]
    fn test_force_tier_is_manual() {
        let mut controller = QualityController::new(QualityTier::Minimal, &QualityConfig::default());
        let change = controller.force_tier(QualityTier::Ultra, Instant::now()).unwrap();

        assert_eq!(change.reason, TierChangeReason::Manual);
        assert!(controller.force_tier(QualityTier::Ultra, Instant::now()).is_none());
        assert_eq!(controller.history().len(), 2);
    }

    #[test]
    fn test_tier_change_publishes_settings() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut controller =
            QualityController::new(QualityTier::Medium, &QualityConfig::default()).with_events(bus);

        controller.force_tier(QualityTier::Low, Instant::now());
        match rx.try_recv().unwrap() {
            ResourceEvent::TierChanged { from, to, settings, .. } => {
                assert_eq!(from, QualityTier::Medium);
                assert_eq!(to, QualityTier::Low);
                assert_eq!(settings, QualityTier::Low.settings());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_preferred_tier_overrides_benchmark() {
        let result = BenchmarkResult::estimated(90.0, 90.0, 90.0);
        let config = QualityConfig {
            preferred_tier: Some(QualityTier::Low),
            ..QualityConfig::default()
        };

        assert_eq!(QualityController::from_benchmark(&result, &config).tier(), QualityTier::Low);
        assert_eq!(
            QualityController::from_benchmark(&result, &QualityConfig::default()).tier(),
            QualityTier::Ultra
        );
    }
}
