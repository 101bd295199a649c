//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! validation rules and TOML round-trips.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_pool_config()(
        max_contexts in 1usize..32,
        max_pooled in 0usize..8,
        memory_budget_mb in 1u64..8192,
        memory_constrained in any::<bool>(),
        restore_timeout_ms in 0u64..60_000,
    ) -> PoolConfig {
        PoolConfig {
            max_contexts,
            max_pooled,
            memory_budget_mb,
            memory_constrained,
            restore_timeout_ms,
        }
    }
}

prop_compose! {
    fn valid_quality_config()(
        min_fps in 5.0f32..50.0,
        headroom in 1.0f32..100.0,
        upgrade_factor in 1.0f32..2.0,
        adjustment_threshold_secs in 0.1f64..30.0,
        fps_window in 1usize..120,
        auto_adjust in any::<bool>(),
        preferred_tier in proptest::option::of(proptest::sample::select(QualityTier::ALL.to_vec())),
    ) -> QualityConfig {
        QualityConfig {
            min_fps,
            target_fps: min_fps + headroom,
            upgrade_factor,
            adjustment_threshold_secs,
            fps_window,
            auto_adjust,
            preferred_tier,
        }
    }
}

prop_compose! {
    fn valid_monitor_config()(
        sample_window_secs in 1.0f64..120.0,
        fps_window in 1usize..120,
        memory_budget_mb in 1u64..16_384,
        warning_ratio in 0.1f64..0.9,
        critical_gap in 0.01f64..0.1,
        memory_sample_interval_ms in 10u64..10_000,
        min_fps in 1.0f32..60.0,
    ) -> MonitorConfig {
        MonitorConfig {
            sample_window_secs,
            fps_window,
            memory_budget_mb,
            warning_ratio,
            critical_ratio: warning_ratio + critical_gap,
            memory_sample_interval_ms,
            min_fps,
        }
    }
}

prop_compose! {
    fn valid_asset_config()(
        total_budget_mb in 1u64..4096,
        shares in prop::array::uniform4(1u32..100),
        retry_attempts in 1u32..10,
        retry_delay_ms in 0u64..5_000,
        strategy in prop_oneof![
            Just(LoadStrategy::Aggressive),
            Just(LoadStrategy::Balanced),
            Just(LoadStrategy::Conservative),
        ],
    ) -> AssetConfig {
        // Normalize with a little slack so rounding never pushes the sum over 1.0
        let sum: u32 = shares.iter().sum();
        let share = |value: u32| f64::from(value) / f64::from(sum) * 0.999;
        AssetConfig {
            total_budget_mb,
            partition: BudgetPartition {
                textures: share(shares[0]),
                models: share(shares[1]),
                audio: share(shares[2]),
                code: share(shares[3]),
            },
            retry_attempts,
            retry_delay_ms,
            strategy,
        }
    }
}

prop_compose! {
    fn valid_anima_config()(
        pool in valid_pool_config(),
        quality in valid_quality_config(),
        monitor in valid_monitor_config(),
        assets in valid_asset_config(),
        debug in any::<bool>(),
    ) -> AnimaConfig {
        AnimaConfig {
            general: GeneralConfig { debug, ..GeneralConfig::default() },
            pool,
            benchmark: BenchmarkConfig::default(),
            quality,
            monitor,
            assets,
        }
    }
}

proptest! {
    #[test]
    fn test_generated_configs_validate(config in valid_anima_config()) {
        prop_assert!(config.validate().is_ok(), "rejected: {:?}", config.validate().err());
    }

    #[test]
    fn test_config_toml_roundtrip(config in valid_anima_config()) {
        let toml_string = toml::to_string(&config).unwrap();
        let parsed: AnimaConfig = toml::from_str(&toml_string).unwrap();

        prop_assert_eq!(&config.pool, &parsed.pool);
        prop_assert_eq!(config.quality.fps_window, parsed.quality.fps_window);
        prop_assert_eq!(config.quality.preferred_tier, parsed.quality.preferred_tier);
        prop_assert_eq!(config.assets.strategy, parsed.assets.strategy);
        prop_assert!((config.monitor.warning_ratio - parsed.monitor.warning_ratio).abs() < 1e-9);
        prop_assert!((config.quality.min_fps - parsed.quality.min_fps).abs() < 0.001);
    }

    #[test]
    fn test_inverted_fps_band_rejected(min_fps in 30.0f32..120.0, gap in 0.0f32..20.0) {
        let mut config = AnimaConfig::default();
        config.quality.min_fps = min_fps;
        config.quality.target_fps = min_fps - gap;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversubscribed_partition_rejected(extra in 0.01f64..0.5) {
        let mut config = AnimaConfig::default();
        config.assets.partition.code += extra;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_merge_overrides_changed_sections(pool in valid_pool_config(), target_fps in 61.0f32..240.0) {
        let mut base = AnimaConfig::default();
        base.quality.target_fps = target_fps;

        let partial = AnimaConfig { pool: pool.clone(), ..AnimaConfig::default() };
        let merged = base.merge_partial(partial);

        prop_assert_eq!(merged.pool, pool);
        prop_assert_eq!(merged.quality.target_fps, target_fps);
    }
}
