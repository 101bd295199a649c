//! Rendering context pool
//!
//! Hardware contexts are scarce (browsers and drivers cap them at a
//! handful) and expensive to create. This module hands out contexts to
//! surfaces, keeps a small pool of released contexts for reuse, and keeps
//! the total under a count cap and a soft memory budget:
//!
//! - **Reuse**: a surface that already holds a context gets it back; a
//!   released context with compatible options is reused under a new id
//! - **Fallback**: when no context can be produced the caller renders in
//!   software instead; acquisition never errors
//! - **Cleanup**: under memory pressure the least recently used contexts
//!   are evicted
//! - **Loss**: lost contexts keep their slot until restored or dropped
//!
//! # Usage
//!
//! ```
//! use anima::config::PoolConfig;
//! use anima::context::{AcquireOutcome, ContextOptions, ContextPoolManager, HeadlessBackend};
//!
//! let mut pool = ContextPoolManager::new(HeadlessBackend::new(256, 256), &PoolConfig::default());
//! if let AcquireOutcome::Acquired(id) = pool.acquire("main-canvas", ContextOptions::default()) {
//!     pool.release(id).unwrap();
//! }
//! assert_eq!(pool.pooled_count(), 1);
//! ```

mod backend;

pub use backend::{ContextBackend, HeadlessBackend, HeadlessStats, SurfaceToken};

#[cfg(test)]
pub use backend::MockContextBackend;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::ContextError;
use crate::events::{EventBus, ResourceEvent};

/// Share of live contexts evicted by one cleanup pass, in percent
const CLEANUP_SHARE_PERCENT: usize = 30;

/// Identifier of a handed-out context; never reused within a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Caller-chosen name of a drawing surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SurfaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SurfaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// GPU selection hint passed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    Default,
    LowPower,
    HighPerformance,
}

/// Creation options of a context
///
/// A pooled context is only reused for a request with identical options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextOptions {
    pub alpha: bool,
    pub depth: bool,
    pub antialias: bool,
    pub power_preference: PowerPreference,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            alpha: true,
            depth: true,
            antialias: true,
            power_preference: PowerPreference::Default,
        }
    }
}

impl ContextOptions {
    /// Options downgraded for memory-constrained devices
    pub fn constrained(self) -> Self {
        Self {
            antialias: false,
            power_preference: PowerPreference::LowPower,
            ..self
        }
    }

    pub fn is_compatible_with(&self, other: &ContextOptions) -> bool {
        self == other
    }
}

/// Lifecycle state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Bound to a surface
    Active,
    /// Released and kept for reuse
    Pooled,
    /// Lost by the driver, waiting for a restore
    Lost,
}

impl ContextState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextState::Active => "active",
            ContextState::Pooled => "pooled",
            ContextState::Lost => "lost",
        }
    }
}

/// Bookkeeping for one context
#[derive(Debug, Clone)]
pub struct ContextHandle {
    id: ContextId,
    surface: Option<SurfaceId>,
    options: ContextOptions,
    state: ContextState,
    created_at: Instant,
    last_used_at: Instant,
    lost_at: Option<Instant>,
    estimated_memory_bytes: u64,
    draw_calls_since_sample: u64,
    token: SurfaceToken,
}

impl ContextHandle {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Surface bound to this context; `None` while pooled
    pub fn surface(&self) -> Option<&SurfaceId> {
        self.surface.as_ref()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn lost_at(&self) -> Option<Instant> {
        self.lost_at
    }

    pub fn estimated_memory_bytes(&self) -> u64 {
        self.estimated_memory_bytes
    }

    pub fn draw_calls_since_sample(&self) -> u64 {
        self.draw_calls_since_sample
    }

    pub fn token(&self) -> SurfaceToken {
        self.token
    }
}

/// Result of an acquisition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A hardware context is bound to the surface
    Acquired(ContextId),
    /// No context available; render in software
    Fallback,
}

impl AcquireOutcome {
    pub fn context_id(self) -> Option<ContextId> {
        match self {
            AcquireOutcome::Acquired(id) => Some(id),
            AcquireOutcome::Fallback => None,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, AcquireOutcome::Fallback)
    }
}

/// Statistics about pool performance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Total acquisition requests
    pub acquisitions: u64,
    /// Requests served by an existing or pooled context
    pub cache_hits: u64,
    /// Contexts created by the backend
    pub created: u64,
    /// Pooled contexts handed out under a new id
    pub reused: u64,
    /// Contexts put back into the pool on release
    pub released_to_pool: u64,
    /// Contexts destroyed for any reason
    pub destroyed: u64,
    /// Contexts removed by memory cleanup or reclamation
    pub evictions: u64,
    /// Requests answered with a software fallback
    pub fallbacks: u64,
    /// Backend creation failures
    pub creation_failures: u64,
}

impl PoolStats {
    /// Percentage of acquisitions served without creating a context
    pub fn hit_rate(&self) -> f32 {
        if self.acquisitions == 0 {
            return 0.0;
        }
        (self.cache_hits as f32 / self.acquisitions as f32) * 100.0
    }
}

/// Outcome of a memory cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted: Vec<ContextId>,
    pub freed_bytes: u64,
    pub usage_after: u64,
}

/// Pool of rendering contexts bounded by count and memory
pub struct ContextPoolManager<B: ContextBackend> {
    backend: B,
    config: PoolConfig,
    memory_budget: u64,
    /// Active and lost contexts
    live: HashMap<ContextId, ContextHandle>,
    surfaces: HashMap<SurfaceId, ContextId>,
    /// Released contexts, most recently released first
    pool: VecDeque<ContextHandle>,
    next_id: u64,
    fallback_only: bool,
    stats: PoolStats,
    events: Option<EventBus>,
}

impl<B: ContextBackend> ContextPoolManager<B> {
    /// Creates a new pool in front of `backend`
    pub fn new(backend: B, config: &PoolConfig) -> Self {
        info!(
            "🎛️ Context pool: max {} contexts, {} pooled, {} MB budget{}",
            config.max_contexts,
            config.max_pooled,
            config.memory_budget_mb,
            if config.memory_constrained { " (constrained)" } else { "" }
        );

        Self {
            backend,
            memory_budget: config.memory_budget_bytes(),
            config: config.clone(),
            live: HashMap::new(),
            surfaces: HashMap::new(),
            pool: VecDeque::new(),
            next_id: 1,
            fallback_only: false,
            stats: PoolStats::default(),
            events: None,
        }
    }

    /// Publish lifecycle events on `bus`
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Acquire a context for `surface`
    ///
    /// Never fails: when nothing can be produced the caller gets
    /// [`AcquireOutcome::Fallback`] and should render in software.
    pub fn acquire(&mut self, surface: impl Into<SurfaceId>, options: ContextOptions) -> AcquireOutcome {
        let surface = surface.into();
        self.stats.acquisitions += 1;

        let options = if self.config.memory_constrained {
            options.constrained()
        } else {
            options
        };

        if let Some(id) = self.surfaces.get(&surface).copied() {
            if let Some(handle) = self.live.get_mut(&id) {
                // The slot stays reserved until the context is restored or dropped
                if handle.state == ContextState::Lost {
                    return self.fall_back(&surface, "context is lost until restored");
                }
                handle.last_used_at = Instant::now();
                self.stats.cache_hits += 1;
                debug!("♻️ Surface '{}' already holds {}", surface, id);
                return AcquireOutcome::Acquired(id);
            }
        }

        if self.fallback_only {
            return self.fall_back(&surface, "backend never produced a context");
        }

        if self.live.len() >= self.config.max_contexts {
            return self.fall_back(&surface, "context cap reached");
        }

        if let Some(id) = self.reuse_pooled(&surface, &options) {
            return AcquireOutcome::Acquired(id);
        }

        let estimate = self.backend.estimate_memory(&options);
        if !self.fits_budget(estimate) {
            self.reclaim_pooled(estimate);
        }
        if !self.fits_budget(estimate) {
            return self.fall_back(&surface, "memory budget exhausted");
        }

        match self.backend.create_context(&options) {
            Ok(token) => {
                let id = self.next_context_id();
                let now = Instant::now();
                self.live.insert(
                    id,
                    ContextHandle {
                        id,
                        surface: Some(surface.clone()),
                        options,
                        state: ContextState::Active,
                        created_at: now,
                        last_used_at: now,
                        lost_at: None,
                        estimated_memory_bytes: estimate,
                        draw_calls_since_sample: 0,
                        token,
                    },
                );
                self.surfaces.insert(surface.clone(), id);
                self.stats.created += 1;
                info!("✨ Created {} for '{}' (~{} KB)", id, surface, estimate / 1024);
                AcquireOutcome::Acquired(id)
            }
            Err(e) => {
                self.stats.creation_failures += 1;
                if self.stats.created == 0 {
                    self.fallback_only = true;
                    error!("❌ {}; using software rendering from now on", e);
                } else {
                    warn!("⚠️ {}", e);
                }
                self.fall_back(&surface, "backend refused creation")
            }
        }
    }

    /// Release a context back to the pool, or destroy it
    pub fn release(&mut self, id: ContextId) -> Result<(), ContextError> {
        let mut handle = self.live.remove(&id).ok_or(ContextError::UnknownHandle(id))?;
        self.unbind_surface(&handle);
        self.backend.detach(handle.token);

        let keep = handle.state == ContextState::Active
            && !self.config.memory_constrained
            && self.pool.len() < self.config.max_pooled
            && self.fits_budget(handle.estimated_memory_bytes);

        if keep {
            debug!("📥 {} returned to pool", id);
            handle.state = ContextState::Pooled;
            handle.surface = None;
            handle.last_used_at = Instant::now();
            self.pool.push_front(handle);
            self.stats.released_to_pool += 1;
        } else {
            self.destroy(handle);
        }

        Ok(())
    }

    /// Evict least recently used contexts until under budget
    ///
    /// Removes at least 30% (rounded up) of all live and pooled contexts,
    /// then keeps going while the estimated usage exceeds the budget.
    /// Evicted active contexts are announced with `ContextEvicted`.
    pub fn perform_memory_cleanup(&mut self) -> CleanupReport {
        let total = self.live.len() + self.pool.len();
        if total == 0 {
            return CleanupReport::default();
        }

        let quota = (total * CLEANUP_SHARE_PERCENT).div_ceil(100);
        let mut candidates: Vec<(Instant, ContextId)> = self
            .live
            .values()
            .chain(self.pool.iter())
            .map(|handle| (handle.last_used_at, handle.id))
            .collect();
        candidates.sort();

        let mut report = CleanupReport::default();
        for (_, id) in candidates {
            if report.evicted.len() >= quota && self.memory_usage() <= self.memory_budget {
                break;
            }
            if let Some(freed) = self.evict(id) {
                report.evicted.push(id);
                report.freed_bytes += freed;
            }
        }

        report.usage_after = self.memory_usage();
        info!(
            "🧹 Memory cleanup evicted {} contexts, freed {} KB (now {} KB)",
            report.evicted.len(),
            report.freed_bytes / 1024,
            report.usage_after / 1024
        );
        report
    }

    /// The driver lost this context; it keeps its slot until restored
    pub fn mark_lost(&mut self, id: ContextId, now: Instant) -> Result<(), ContextError> {
        let handle = self.live.get_mut(&id).ok_or(ContextError::UnknownHandle(id))?;
        if handle.state != ContextState::Active {
            return Err(ContextError::InvalidTransition {
                id,
                from: handle.state.as_str(),
                to: ContextState::Lost.as_str(),
            });
        }

        handle.state = ContextState::Lost;
        handle.lost_at = Some(now);
        warn!("💥 {} lost, rendering suspended", id);

        let surface = handle.surface.clone();
        if let Some(surface) = surface {
            self.publish(ResourceEvent::ContextLost { surface, id });
        }
        Ok(())
    }

    /// A lost context is usable again; the owner must recreate GPU resources
    pub fn mark_restored(&mut self, id: ContextId) -> Result<(), ContextError> {
        let handle = self.live.get_mut(&id).ok_or(ContextError::UnknownHandle(id))?;
        if handle.state != ContextState::Lost {
            return Err(ContextError::InvalidTransition {
                id,
                from: handle.state.as_str(),
                to: ContextState::Active.as_str(),
            });
        }

        handle.state = ContextState::Active;
        handle.lost_at = None;
        handle.last_used_at = Instant::now();
        info!("🔄 {} restored", id);

        let surface = handle.surface.clone();
        if let Some(surface) = surface {
            self.publish(ResourceEvent::ContextRestored { surface, id });
        }
        Ok(())
    }

    /// Drop lost contexts whose restore window has elapsed
    pub fn drop_unrestored(&mut self, now: Instant) -> Vec<ContextId> {
        let timeout = self.config.restore_timeout();
        let expired: Vec<ContextId> = self
            .live
            .values()
            .filter(|handle| {
                handle
                    .lost_at
                    .is_some_and(|lost_at| now.saturating_duration_since(lost_at) >= timeout)
            })
            .map(|handle| handle.id)
            .collect();

        for id in &expired {
            if let Some(handle) = self.live.remove(id) {
                self.unbind_surface(&handle);
                warn!("🪦 {} was not restored within {:?}, dropping", id, timeout);
                if let Some(surface) = handle.surface.clone() {
                    self.publish(ResourceEvent::ContextDropped { surface, id: *id });
                }
                self.destroy(handle);
            }
        }

        expired
    }

    /// Destroy every context, live and pooled
    pub fn cleanup_all(&mut self) {
        let handles: Vec<ContextHandle> = self
            .live
            .drain()
            .map(|(_, handle)| handle)
            .chain(self.pool.drain(..))
            .collect();
        self.surfaces.clear();

        let count = handles.len();
        for handle in handles {
            self.backend.detach(handle.token);
            self.destroy(handle);
        }
        info!("🧽 Destroyed all {} contexts", count);
    }

    /// Whether a context with `options` could be created right now
    pub fn can_create_new_context(&self, options: &ContextOptions) -> bool {
        !self.fallback_only
            && self.live.len() < self.config.max_contexts
            && self.fits_budget(self.backend.estimate_memory(options))
    }

    /// Count draw calls issued on a context since the last sample
    pub fn record_draw_calls(&mut self, id: ContextId, count: u64) -> Result<(), ContextError> {
        let handle = self.live.get_mut(&id).ok_or(ContextError::UnknownHandle(id))?;
        handle.draw_calls_since_sample += count;
        handle.last_used_at = Instant::now();
        Ok(())
    }

    /// Total draw calls since the previous sample; resets the counters
    pub fn take_draw_call_sample(&mut self) -> u64 {
        self.live
            .values_mut()
            .map(|handle| std::mem::take(&mut handle.draw_calls_since_sample))
            .sum()
    }

    pub fn handle(&self, id: ContextId) -> Option<&ContextHandle> {
        self.live.get(&id)
    }

    /// Context currently bound to `surface`
    pub fn context_for(&self, surface: &str) -> Option<&ContextHandle> {
        self.surfaces
            .get(&SurfaceId::from(surface))
            .and_then(|id| self.live.get(id))
    }

    /// Contexts bound to surfaces (active or lost)
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn active_count(&self) -> usize {
        self.live
            .values()
            .filter(|handle| handle.state == ContextState::Active)
            .count()
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    /// Estimated memory of live and pooled contexts
    pub fn memory_usage(&self) -> u64 {
        self.live
            .values()
            .chain(self.pool.iter())
            .map(|handle| handle.estimated_memory_bytes)
            .sum()
    }

    pub fn memory_budget(&self) -> u64 {
        self.memory_budget
    }

    /// Change the soft budget; enforced on the next acquisition or cleanup
    pub fn set_memory_budget(&mut self, bytes: u64) {
        info!("📐 Context memory budget set to {} KB", bytes / 1024);
        self.memory_budget = bytes;
    }

    /// Whether the backend never produced a context and acquisitions fall back
    pub fn is_fallback_only(&self) -> bool {
        self.fallback_only
    }

    /// Allow creation attempts again after a driver change
    pub fn reset_fallback(&mut self) {
        self.fallback_only = false;
    }

    pub fn restore_timeout(&self) -> Duration {
        self.config.restore_timeout()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn fits_budget(&self, additional: u64) -> bool {
        self.memory_usage().saturating_add(additional) <= self.memory_budget
    }

    fn next_context_id(&mut self) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        id
    }

    fn fall_back(&mut self, surface: &SurfaceId, reason: &str) -> AcquireOutcome {
        self.stats.fallbacks += 1;
        warn!("🚫 Surface '{}' falls back to software: {}", surface, reason);
        AcquireOutcome::Fallback
    }

    fn reuse_pooled(&mut self, surface: &SurfaceId, options: &ContextOptions) -> Option<ContextId> {
        let position = self
            .pool
            .iter()
            .position(|handle| handle.options.is_compatible_with(options))?;
        let mut handle = self.pool.remove(position)?;

        let previous = handle.id;
        let id = self.next_context_id();
        handle.id = id;
        handle.surface = Some(surface.clone());
        handle.state = ContextState::Active;
        handle.last_used_at = Instant::now();
        handle.draw_calls_since_sample = 0;

        self.live.insert(id, handle);
        self.surfaces.insert(surface.clone(), id);
        self.stats.reused += 1;
        self.stats.cache_hits += 1;
        debug!("♻️ Reused pooled {} as {} for '{}'", previous, id, surface);
        Some(id)
    }

    /// Destroy pooled contexts, oldest first, until `needed` bytes fit
    fn reclaim_pooled(&mut self, needed: u64) {
        while !self.fits_budget(needed) {
            let Some(handle) = self.pool.pop_back() else {
                break;
            };
            debug!("🧹 Reclaiming pooled {} for a new context", handle.id);
            self.stats.evictions += 1;
            self.destroy(handle);
        }
    }

    /// Remove a context wherever it lives; returns the bytes freed
    fn evict(&mut self, id: ContextId) -> Option<u64> {
        let handle = if let Some(handle) = self.live.remove(&id) {
            self.unbind_surface(&handle);
            self.backend.detach(handle.token);
            if let Some(surface) = handle.surface.clone() {
                self.publish(ResourceEvent::ContextEvicted { surface, id });
            }
            handle
        } else {
            let position = self.pool.iter().position(|handle| handle.id == id)?;
            self.pool.remove(position)?
        };

        let freed = handle.estimated_memory_bytes;
        self.stats.evictions += 1;
        self.destroy(handle);
        Some(freed)
    }

    fn unbind_surface(&mut self, handle: &ContextHandle) {
        if let Some(surface) = &handle.surface {
            if self.surfaces.get(surface) == Some(&handle.id) {
                self.surfaces.remove(surface);
            }
        }
    }

    fn destroy(&mut self, handle: ContextHandle) {
        self.backend.destroy(handle.token);
        self.stats.destroyed += 1;
        debug!("🗑️ Destroyed {}", handle.id);
    }

    fn publish(&self, event: ResourceEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

impl<B: ContextBackend> Drop for ContextPoolManager<B> {
    fn drop(&mut self) {
        if !self.live.is_empty() || !self.pool.is_empty() {
            self.cleanup_all();
        }
    }
}
