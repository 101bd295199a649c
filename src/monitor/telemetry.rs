//! Memory telemetry sources
//!
//! The monitor and the memory probe read memory through `MemoryTelemetry`
//! so hosts without a usable heap counter can report `None` and tests can
//! script the numbers.

use log::debug;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// One memory reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    /// Memory attributed to this process
    pub used_bytes: u64,
    /// Most the process could use before hitting the limit
    pub limit_bytes: u64,
}

impl MemorySnapshot {
    pub fn new(used_bytes: u64, limit_bytes: u64) -> Self {
        Self {
            used_bytes,
            limit_bytes,
        }
    }

    pub fn free_bytes(&self) -> u64 {
        self.limit_bytes.saturating_sub(self.used_bytes)
    }

    /// Free share of the limit, 0.0 when the limit is unknown
    pub fn free_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.free_bytes() as f64 / self.limit_bytes as f64
    }
}

/// Source of memory readings
pub trait MemoryTelemetry {
    /// Current reading, `None` when the host exposes no memory counters
    fn sample(&mut self) -> Option<MemorySnapshot>;
}

/// Reads process and host memory through `sysinfo`
pub struct SystemMemoryTelemetry {
    system: System,
    pid: Option<Pid>,
}

impl SystemMemoryTelemetry {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            debug!("🔍 Current pid unavailable, reporting host memory only");
        }
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SystemMemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTelemetry for SystemMemoryTelemetry {
    fn sample(&mut self) -> Option<MemorySnapshot> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        let available = self.system.available_memory();

        let resident = match self.pid {
            Some(pid) => {
                self.system
                    .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                self.system.process(pid).map(|process| process.memory())
            }
            None => None,
        };

        let snapshot = match resident {
            Some(used) => MemorySnapshot::new(used, (used + available).min(total)),
            None => MemorySnapshot::new(total.saturating_sub(available), total),
        };
        Some(snapshot)
    }
}

/// Telemetry that reports whatever it was last given
#[derive(Debug, Clone, Default)]
pub struct StaticTelemetry {
    snapshot: Option<MemorySnapshot>,
    reads: u64,
}

impl StaticTelemetry {
    pub fn new(snapshot: Option<MemorySnapshot>) -> Self {
        Self { snapshot, reads: 0 }
    }

    /// Telemetry for a host with no memory counters
    pub fn unavailable() -> Self {
        Self::new(None)
    }

    pub fn set(&mut self, snapshot: Option<MemorySnapshot>) {
        self.snapshot = snapshot;
    }

    pub fn set_used(&mut self, used_bytes: u64) {
        if let Some(snapshot) = &mut self.snapshot {
            snapshot.used_bytes = used_bytes;
        }
    }

    /// Number of samples taken so far
    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl MemoryTelemetry for StaticTelemetry {
    fn sample(&mut self) -> Option<MemorySnapshot> {
        self.reads += 1;
        self.snapshot
    }
}
