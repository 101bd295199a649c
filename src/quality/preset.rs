//! Quality tier ladder and the static presets behind each tier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Discrete quality levels, ordered from cheapest to most expensive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Minimal,
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    /// Every tier, bottom of the ladder first
    pub const ALL: [QualityTier; 5] = [
        QualityTier::Minimal,
        QualityTier::Low,
        QualityTier::Medium,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    /// Initial tier for an overall benchmark score (0-100)
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            QualityTier::Ultra
        } else if score >= 65.0 {
            QualityTier::High
        } else if score >= 45.0 {
            QualityTier::Medium
        } else if score >= 25.0 {
            QualityTier::Low
        } else {
            QualityTier::Minimal
        }
    }

    /// Next tier up, `None` at the top
    pub fn step_up(self) -> Option<Self> {
        match self {
            QualityTier::Minimal => Some(QualityTier::Low),
            QualityTier::Low => Some(QualityTier::Medium),
            QualityTier::Medium => Some(QualityTier::High),
            QualityTier::High => Some(QualityTier::Ultra),
            QualityTier::Ultra => None,
        }
    }

    /// Next tier down, `None` at the floor
    pub fn step_down(self) -> Option<Self> {
        match self {
            QualityTier::Minimal => None,
            QualityTier::Low => Some(QualityTier::Minimal),
            QualityTier::Medium => Some(QualityTier::Low),
            QualityTier::High => Some(QualityTier::Medium),
            QualityTier::Ultra => Some(QualityTier::High),
        }
    }

    /// Position on the ladder, 0 for minimal
    pub fn rung(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Minimal => "minimal",
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Ultra => "ultra",
        }
    }

    pub fn settings(self) -> QualitySettings {
        QualityPreset::for_tier(self).settings
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown quality tier '{0}' (expected minimal, low, medium, high or ultra)")]
pub struct ParseTierError(String);

impl FromStr for QualityTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualityTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTierError(s.to_string()))
    }
}

/// Shadow rendering quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowQuality {
    Off,    // No shadows
    Low,    // Simple shadow with minimal blur
    Medium, // Standard shadow with moderate blur
    High,   // High-quality shadow with extensive blur
    Ultra,  // Maximum quality with soft contact shadows
}

/// Post-processing passes enabled for a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessing {
    pub bloom: bool,
    pub ambient_occlusion: bool,
    pub motion_blur: bool,
}

impl PostProcessing {
    const NONE: PostProcessing = PostProcessing {
        bloom: false,
        ambient_occlusion: false,
        motion_blur: false,
    };
}

/// Settings payload a renderer applies for a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    /// Multiplier on the device pixel density
    pub pixel_ratio: f32,
    pub shadow_quality: ShadowQuality,
    pub max_particles: u32,
    /// Largest texture edge in pixels
    pub texture_size_cap: u32,
    pub antialias: bool,
    pub post_processing: PostProcessing,
}

/// A tier together with its settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPreset {
    pub tier: QualityTier,
    pub settings: QualitySettings,
}

impl QualityPreset {
    pub fn for_tier(tier: QualityTier) -> Self {
        let settings = match tier {
            QualityTier::Ultra => QualitySettings {
                pixel_ratio: 2.0,
                shadow_quality: ShadowQuality::Ultra,
                max_particles: 10_000,
                texture_size_cap: 4096,
                antialias: true,
                post_processing: PostProcessing {
                    bloom: true,
                    ambient_occlusion: true,
                    motion_blur: true,
                },
            },
            QualityTier::High => QualitySettings {
                pixel_ratio: 1.5,
                shadow_quality: ShadowQuality::High,
                max_particles: 5_000,
                texture_size_cap: 2048,
                antialias: true,
                post_processing: PostProcessing {
                    bloom: true,
                    ambient_occlusion: true,
                    motion_blur: false,
                },
            },
            QualityTier::Medium => QualitySettings {
                pixel_ratio: 1.0,
                shadow_quality: ShadowQuality::Medium,
                max_particles: 2_000,
                texture_size_cap: 1024,
                antialias: true,
                post_processing: PostProcessing {
                    bloom: true,
                    ..PostProcessing::NONE
                },
            },
            QualityTier::Low => QualitySettings {
                pixel_ratio: 0.75,
                shadow_quality: ShadowQuality::Low,
                max_particles: 500,
                texture_size_cap: 512,
                antialias: false,
                post_processing: PostProcessing::NONE,
            },
            QualityTier::Minimal => QualitySettings {
                pixel_ratio: 0.5,
                shadow_quality: ShadowQuality::Off,
                max_particles: 100,
                texture_size_cap: 256,
                antialias: false,
                post_processing: PostProcessing::NONE,
            },
        };

        Self { tier, settings }
    }
}
