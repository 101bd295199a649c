//! Partitioned asset memory budget

use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::config::BudgetPartition;
use crate::error::AssetError;

/// Budget partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetCategory {
    Textures,
    Models,
    Audio,
    Code,
}

impl BudgetCategory {
    pub const ALL: [BudgetCategory; 4] = [
        BudgetCategory::Textures,
        BudgetCategory::Models,
        BudgetCategory::Audio,
        BudgetCategory::Code,
    ];
}

impl fmt::Display for BudgetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BudgetCategory::Textures => "textures",
            BudgetCategory::Models => "models",
            BudgetCategory::Audio => "audio",
            BudgetCategory::Code => "code",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct Partition {
    limit: u64,
    used: u64,
}

/// Per-category limits and usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBudget {
    partitions: HashMap<BudgetCategory, Partition>,
}

impl AssetBudget {
    /// Split `total_bytes` according to `partition`
    pub fn new(total_bytes: u64, partition: &BudgetPartition) -> Self {
        let share = |fraction: f64| (total_bytes as f64 * fraction.clamp(0.0, 1.0)).floor() as u64;
        Self::with_limits([
            (BudgetCategory::Textures, share(partition.textures)),
            (BudgetCategory::Models, share(partition.models)),
            (BudgetCategory::Audio, share(partition.audio)),
            (BudgetCategory::Code, share(partition.code)),
        ])
    }

    /// Explicit limits; missing categories get zero
    pub fn with_limits(limits: impl IntoIterator<Item = (BudgetCategory, u64)>) -> Self {
        let mut partitions: HashMap<BudgetCategory, Partition> = BudgetCategory::ALL
            .into_iter()
            .map(|category| (category, Partition::default()))
            .collect();
        for (category, limit) in limits {
            partitions.entry(category).or_default().limit = limit;
        }
        Self { partitions }
    }

    pub fn limit(&self, category: BudgetCategory) -> u64 {
        self.partition(category).limit
    }

    pub fn used(&self, category: BudgetCategory) -> u64 {
        self.partition(category).used
    }

    pub fn remaining(&self, category: BudgetCategory) -> u64 {
        let partition = self.partition(category);
        partition.limit.saturating_sub(partition.used)
    }

    /// Check without reserving
    pub fn check(&self, category: BudgetCategory, bytes: u64) -> Result<(), AssetError> {
        let remaining = self.remaining(category);
        if bytes > remaining {
            return Err(AssetError::BudgetExceeded {
                category,
                requested: bytes,
                remaining,
            });
        }
        Ok(())
    }

    /// Check and reserve in one step
    pub fn try_reserve(&mut self, category: BudgetCategory, bytes: u64) -> Result<(), AssetError> {
        self.check(category, bytes)?;
        let partition = self.partitions.entry(category).or_default();
        partition.used += bytes;
        debug!("💰 Reserved {} bytes of {} ({} used)", bytes, category, partition.used);
        Ok(())
    }

    pub fn release(&mut self, category: BudgetCategory, bytes: u64) {
        let partition = self.partitions.entry(category).or_default();
        partition.used = partition.used.saturating_sub(bytes);
    }

    /// Total bytes reserved across categories
    pub fn total_used(&self) -> u64 {
        self.partitions.values().map(|partition| partition.used).sum()
    }

    fn partition(&self, category: BudgetCategory) -> Partition {
        self.partitions.get(&category).copied().unwrap_or_default()
    }
}
