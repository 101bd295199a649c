//! Driver seam for hardware rendering contexts
//!
//! The pool manager never talks to a graphics API directly. A backend
//! creates contexts, reports how much memory one would take, and tears
//! them down. `HeadlessBackend` is the software implementation used when
//! no accelerated surface exists (tests, the CLI simulator, CI).

use log::debug;
use std::collections::HashMap;

use super::ContextOptions;
use crate::error::ContextError;

/// Bytes per pixel of a colour or depth attachment
const BYTES_PER_PIXEL: u64 = 4;

/// Samples per pixel when antialiasing is requested
const MSAA_SAMPLES: u64 = 4;

/// Opaque backend reference to a created context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceToken(pub u64);

/// Creates and destroys hardware contexts on behalf of the pool
#[cfg_attr(test, mockall::automock)]
pub trait ContextBackend {
    /// Create a context; failures are assumed deterministic for the device
    fn create_context(&mut self, options: &ContextOptions) -> Result<SurfaceToken, ContextError>;

    /// Memory a context created with `options` is expected to occupy
    fn estimate_memory(&self, options: &ContextOptions) -> u64;

    /// Unbind buffers, textures and pipelines so the context can be reused
    fn detach(&mut self, token: SurfaceToken);

    /// Shrink the backing surface to minimal size and clear all bound state
    fn destroy(&mut self, token: SurfaceToken);
}

/// Counters kept by the headless backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub created: u64,
    pub detached: u64,
    pub destroyed: u64,
    pub refused: u64,
}

#[derive(Debug)]
struct HeadlessSurface {
    width: u32,
    height: u32,
    bound_resources: u32,
}

/// Software backend that tracks surfaces without touching a GPU
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    next_token: u64,
    surfaces: HashMap<SurfaceToken, HeadlessSurface>,
    refuse_creation: bool,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    /// Backend whose surfaces are `width` x `height` pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_token: 1,
            surfaces: HashMap::new(),
            refuse_creation: false,
            stats: HeadlessStats::default(),
        }
    }

    /// Make every subsequent creation fail, as a broken driver would
    pub fn set_refuse_creation(&mut self, refuse: bool) {
        self.refuse_creation = refuse;
    }

    /// Surfaces created and not yet destroyed
    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    /// Resources still bound to a surface (zero after detach)
    pub fn bound_resources(&self, token: SurfaceToken) -> Option<u32> {
        self.surfaces.get(&token).map(|surface| surface.bound_resources)
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl ContextBackend for HeadlessBackend {
    fn create_context(&mut self, options: &ContextOptions) -> Result<SurfaceToken, ContextError> {
        if self.refuse_creation {
            self.stats.refused += 1;
            return Err(ContextError::CreationFailed(
                "headless backend is refusing new contexts".to_string(),
            ));
        }

        let token = SurfaceToken(self.next_token);
        self.next_token += 1;

        // Default framebuffer, plus depth and resolve targets when requested
        let bound_resources = 1 + u32::from(options.depth) + u32::from(options.antialias);
        self.surfaces.insert(
            token,
            HeadlessSurface {
                width: self.width,
                height: self.height,
                bound_resources,
            },
        );
        self.stats.created += 1;

        debug!(
            "🖼️ Headless context {:?}: {}x{} {:?}",
            token, self.width, self.height, options
        );
        Ok(token)
    }

    fn estimate_memory(&self, options: &ContextOptions) -> u64 {
        let pixels = u64::from(self.width) * u64::from(self.height);
        let samples = if options.antialias { MSAA_SAMPLES } else { 1 };

        let color = pixels * BYTES_PER_PIXEL * samples;
        let depth = if options.depth { pixels * BYTES_PER_PIXEL * samples } else { 0 };
        // Multisampled targets resolve into a single-sample surface
        let resolve = if options.antialias { pixels * BYTES_PER_PIXEL } else { 0 };

        color + depth + resolve
    }

    fn detach(&mut self, token: SurfaceToken) {
        if let Some(surface) = self.surfaces.get_mut(&token) {
            surface.bound_resources = 0;
            self.stats.detached += 1;
        }
    }

    fn destroy(&mut self, token: SurfaceToken) {
        if let Some(mut surface) = self.surfaces.remove(&token) {
            surface.width = 1;
            surface.height = 1;
            surface.bound_resources = 0;
            self.stats.destroyed += 1;
            debug!("🗑️ Headless context {:?} destroyed", token);
        }
    }
}
