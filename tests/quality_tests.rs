// Quality tier controller integration tests
//
// Drives the controller with synthetic frame streams on a virtual clock and
// checks the tier ladder, the adjustment timer and memory overrides.

use anima::config::QualityConfig;
use anima::monitor::PressureLevel;
use anima::quality::{QualityController, QualityTier, TierChangeReason};
use proptest::prelude::*;
use std::time::{Duration, Instant};

/// Virtual frame clock
struct FrameClock {
    now: Instant,
}

impl FrameClock {
    fn new() -> Self {
        Self { now: Instant::now() }
    }

    /// Feed `count` frames of `ms` each; returns how many changed the tier
    fn feed(&mut self, controller: &mut QualityController, ms: u64, count: u64) -> usize {
        let mut changes = 0;
        for _ in 0..count {
            self.now += Duration::from_millis(ms);
            if controller.observe_frame(Duration::from_millis(ms), self.now).is_some() {
                changes += 1;
            }
        }
        changes
    }

    /// Feed frames of `ms` until `duration` of virtual time has passed
    fn feed_for(&mut self, controller: &mut QualityController, ms: u64, duration: Duration) -> usize {
        self.feed(controller, ms, duration.as_millis() as u64 / ms)
    }
}

#[test]
fn test_sustained_twenty_fps_steps_high_to_medium() {
    let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
    let mut clock = FrameClock::new();

    // 50 ms frames are 20 fps; the window fills after 0.5 s and the timer runs 5 s
    let changes = clock.feed_for(&mut controller, 50, Duration::from_secs(6));

    assert_eq!(changes, 1);
    assert_eq!(controller.tier(), QualityTier::Medium);
    let last = controller.history().last().unwrap();
    assert_eq!(last.from, QualityTier::High);
    assert_eq!(last.reason, TierChangeReason::LowFrameRate);
}

#[test]
fn test_short_dip_that_recovers_changes_nothing() {
    let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
    let mut clock = FrameClock::new();

    clock.feed_for(&mut controller, 16, Duration::from_secs(1));
    clock.feed_for(&mut controller, 50, Duration::from_secs(2));
    assert!(controller.pending_deadline().is_some());

    // 15 ms frames average 66 fps: back above target, below the upgrade line
    let changes = clock.feed_for(&mut controller, 15, Duration::from_secs(10));

    assert_eq!(changes, 0);
    assert_eq!(controller.tier(), QualityTier::High);
    assert!(controller.pending_deadline().is_none());
    assert_eq!(controller.history().len(), 1);
}

#[test]
fn test_critical_pressure_at_ultra_drops_to_minimal_despite_timer() {
    let mut controller = QualityController::new(QualityTier::Ultra, &QualityConfig::default());
    let mut clock = FrameClock::new();

    clock.feed_for(&mut controller, 50, Duration::from_secs(1));
    assert!(controller.pending_deadline().is_some());

    let change = controller
        .on_memory_pressure(PressureLevel::Critical, clock.now)
        .unwrap();
    assert_eq!(change.from, QualityTier::Ultra);
    assert_eq!(change.to, QualityTier::Minimal);
    assert_eq!(controller.tier(), QualityTier::Minimal);

    // The armed downgrade was discarded with the old tier
    assert!(controller.pending_deadline().is_none());
    assert_eq!(clock.feed_for(&mut controller, 50, Duration::from_secs(10)), 0);
    assert_eq!(controller.tier(), QualityTier::Minimal);
}

#[test]
fn test_recovery_climbs_one_rung_per_window() {
    let mut controller = QualityController::new(QualityTier::Minimal, &QualityConfig::default());
    let mut clock = FrameClock::new();

    // 8 ms frames are 125 fps, well above the 72 fps upgrade line
    clock.feed_for(&mut controller, 8, Duration::from_secs(6));
    assert_eq!(controller.tier(), QualityTier::Low);

    clock.feed_for(&mut controller, 8, Duration::from_secs(6));
    assert_eq!(controller.tier(), QualityTier::Medium);
}

#[test]
fn test_memory_warning_bypasses_timer() {
    let mut controller = QualityController::new(QualityTier::Medium, &QualityConfig::default());
    let change = controller
        .on_memory_pressure(PressureLevel::Warning, Instant::now())
        .unwrap();

    assert_eq!(change.to, QualityTier::Low);
    assert_eq!(change.reason, TierChangeReason::MemoryWarning);
}

#[derive(Debug, Clone)]
enum Stimulus {
    Frames { ms: u64, count: u64 },
    Pressure(PressureLevel),
}

fn stimulus() -> impl Strategy<Value = Stimulus> {
    prop_oneof![
        6 => (4u64..120, 1u64..400).prop_map(|(ms, count)| Stimulus::Frames { ms, count }),
        1 => prop_oneof![
            Just(PressureLevel::Normal),
            Just(PressureLevel::Warning),
            Just(PressureLevel::Critical),
        ]
        .prop_map(Stimulus::Pressure),
    ]
}

proptest! {
    #[test]
    fn test_adjustments_move_one_rung(
        initial in proptest::sample::select(QualityTier::ALL.to_vec()),
        stimuli in prop::collection::vec(stimulus(), 1..30),
    ) {
        let mut controller = QualityController::new(initial, &QualityConfig::default());
        let mut clock = FrameClock::new();

        for stimulus in &stimuli {
            match *stimulus {
                Stimulus::Frames { ms, count } => {
                    clock.feed(&mut controller, ms, count);
                }
                Stimulus::Pressure(level) => {
                    controller.on_memory_pressure(level, clock.now);
                }
            }
        }

        for change in controller.history() {
            if change.reason == TierChangeReason::MemoryCritical {
                prop_assert_eq!(change.to, QualityTier::Minimal);
                continue;
            }
            let distance = (i16::from(change.from.rung()) - i16::from(change.to.rung())).abs();
            prop_assert!(distance <= 1, "{:?} moved {} rungs", change, distance);
        }
    }

    #[test]
    fn test_dips_shorter_than_threshold_are_ignored(dip_ms in 500u64..4_500) {
        let mut controller = QualityController::new(QualityTier::High, &QualityConfig::default());
        let mut clock = FrameClock::new();

        clock.feed_for(&mut controller, 16, Duration::from_secs(1));
        clock.feed_for(&mut controller, 50, Duration::from_millis(dip_ms));
        clock.feed_for(&mut controller, 15, Duration::from_secs(8));

        prop_assert_eq!(controller.tier(), QualityTier::High);
        prop_assert_eq!(controller.history().len(), 1);
    }
}
