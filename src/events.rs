//! Typed publish/subscribe channel for resource events
//!
//! Renderers subscribe to learn about tier changes and context lifecycle;
//! page controllers subscribe to load progress. Publishing never blocks and
//! never fails: with no subscribers the event is simply dropped.

use log::trace;
use tokio::sync::broadcast;

use crate::assets::{CacheKey, LoadState, LoadStrategy};
use crate::context::{ContextId, SurfaceId};
use crate::monitor::{NetworkQuality, PressureLevel};
use crate::quality::{QualitySettings, QualityTier, TierChangeReason};

/// Events raised by the resource manager components
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// The current quality tier changed; `settings` is the full payload to apply
    TierChanged {
        from: QualityTier,
        to: QualityTier,
        reason: TierChangeReason,
        settings: QualitySettings,
    },

    /// Rendering must be suspended until a restore arrives
    ContextLost { surface: SurfaceId, id: ContextId },

    /// Context is usable again; GPU-side resources must be recreated by the owner
    ContextRestored { surface: SurfaceId, id: ContextId },

    /// A lost context was never restored and has been dropped for good
    ContextDropped { surface: SurfaceId, id: ContextId },

    /// The context was reclaimed under memory pressure; the surface must re-acquire
    ContextEvicted { surface: SurfaceId, id: ContextId },

    /// Sampled memory crossed a pressure threshold (in either direction)
    MemoryPressure {
        level: PressureLevel,
        used_bytes: u64,
        budget_bytes: u64,
    },

    /// Rolling frame rate fell below the configured minimum
    FrameRateDrop { fps: f32, min_fps: f32 },

    /// Effective network quality changed
    NetworkChanged { quality: NetworkQuality },

    /// Asset load state transition
    LoadProgress {
        key: CacheKey,
        state: LoadState,
        attempt: u32,
    },

    /// Asset batching strategy changed
    StrategyChanged { from: LoadStrategy, to: LoadStrategy },
}

/// Broadcast bus shared by all components
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ResourceEvent>,
}

impl EventBus {
    /// Create a bus keeping up to `capacity` events for slow subscribers
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning the number of subscribers reached
    pub fn publish(&self, event: ResourceEvent) -> usize {
        trace!("📣 {:?}", event);
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
