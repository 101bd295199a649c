//! Individual capability probes
//!
//! Each probe produces a 0-100 score, or nothing when it could not measure
//! anything at all. Deadlines are hard: a probe cut short reports what it
//! measured so far.

use log::{debug, warn};
use std::future::Future;
use std::hint::black_box;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::monitor::MemoryTelemetry;

/// Depth of the recursive CPU workload
const FIB_DEPTH: u32 = 24;

/// GPU score per achieved frame per second
const FPS_SCORE_FACTOR: f64 = 1.5;

const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("frame submission failed: {0}")]
    Frame(String),

    #[error("probe surface unavailable")]
    Unavailable,
}

/// Score measured by one probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeScore {
    /// `None` when nothing could be measured
    pub score: Option<f64>,
    /// False when the probe stopped early
    pub complete: bool,
}

impl ProbeScore {
    fn complete(score: f64) -> Self {
        Self {
            score: Some(score.min(MAX_SCORE)),
            complete: true,
        }
    }

    fn partial(score: Option<f64>) -> Self {
        Self {
            score: score.map(|score| score.min(MAX_SCORE)),
            complete: false,
        }
    }
}

/// Renders one minimal frame per call
///
/// Every call is one suspension point of the GPU probe.
pub trait FrameProbe {
    fn render_frame(&mut self) -> impl Future<Output = Result<(), ProbeError>>;
}

fn fibonacci(n: u32) -> u64 {
    if n < 2 {
        u64::from(n)
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

/// Run the recursive workload `iterations` times or until `deadline`
pub fn cpu_probe(iterations: u32, scale: f64, deadline: Instant) -> ProbeScore {
    let start = Instant::now();
    let mut completed = 0u32;

    while completed < iterations {
        if Instant::now() >= deadline {
            break;
        }
        black_box(fibonacci(black_box(FIB_DEPTH)));
        completed += 1;
    }

    let elapsed = start.elapsed().as_secs_f64();
    if completed == 0 || elapsed <= 0.0 {
        warn!("⏱️ CPU probe produced no iterations before its deadline");
        return ProbeScore::partial(None);
    }

    let per_second = f64::from(completed) / elapsed;
    let score = per_second * scale;
    debug!("🧮 CPU probe: {} iterations, {:.0}/s, score {:.1}", completed, per_second, score.min(MAX_SCORE));

    if completed < iterations {
        ProbeScore::partial(Some(score))
    } else {
        ProbeScore::complete(score)
    }
}

/// Render up to `frames` frames within `budget` and score the frame rate
pub async fn gpu_probe<P: FrameProbe>(probe: &mut P, frames: u32, budget: Duration) -> ProbeScore {
    let start = tokio::time::Instant::now();
    let mut rendered = 0u32;

    let render_all = async {
        for _ in 0..frames {
            probe.render_frame().await?;
            rendered += 1;
        }
        Ok::<(), ProbeError>(())
    };
    let outcome = tokio::time::timeout(budget, render_all).await;

    let elapsed = start.elapsed().as_secs_f64();
    let score = if rendered > 0 && elapsed > 0.0 {
        Some(f64::from(rendered) / elapsed * FPS_SCORE_FACTOR)
    } else {
        None
    };

    match outcome {
        Ok(Ok(())) => match score {
            Some(score) => {
                debug!("🎞️ GPU probe: {} frames in {:.3}s", rendered, elapsed);
                ProbeScore::complete(score)
            }
            None => ProbeScore::partial(None),
        },
        Ok(Err(e)) => {
            warn!("⚠️ GPU probe stopped after {} frames: {}", rendered, e);
            ProbeScore::partial(score)
        }
        Err(_) => {
            warn!("⏱️ GPU probe timed out after {} of {} frames", rendered, frames);
            ProbeScore::partial(score)
        }
    }
}

/// Score the free share of the memory limit
pub fn memory_probe<T: MemoryTelemetry + ?Sized>(telemetry: &mut T) -> ProbeScore {
    match telemetry.sample() {
        Some(snapshot) if snapshot.limit_bytes > 0 => ProbeScore::complete(snapshot.free_ratio() * MAX_SCORE),
        _ => {
            debug!("🔍 No memory telemetry, memory score will be estimated");
            ProbeScore::partial(None)
        }
    }
}

/// Frame probe that only waits a fixed cost per frame
#[derive(Debug, Clone)]
pub struct SyntheticFrameProbe {
    frame_cost: Duration,
    frames_rendered: u64,
}

impl SyntheticFrameProbe {
    pub fn new(frame_cost: Duration) -> Self {
        Self {
            frame_cost,
            frames_rendered: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

impl FrameProbe for SyntheticFrameProbe {
    async fn render_frame(&mut self) -> Result<(), ProbeError> {
        tokio::time::sleep(self.frame_cost).await;
        self.frames_rendered += 1;
        Ok(())
    }
}

/// Frame probe that rasterizes a moving quad into a CPU framebuffer
#[derive(Debug, Clone)]
pub struct SoftwareFrameProbe {
    width: usize,
    height: usize,
    framebuffer: Vec<u32>,
    frame: usize,
}

impl SoftwareFrameProbe {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            framebuffer: vec![0; width * height],
            frame: 0,
        }
    }

    /// Pixel at `(x, y)` of the last frame
    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.width {
            return None;
        }
        self.framebuffer.get(y * self.width + x).copied()
    }
}

impl FrameProbe for SoftwareFrameProbe {
    async fn render_frame(&mut self) -> Result<(), ProbeError> {
        if self.framebuffer.is_empty() {
            return Err(ProbeError::Unavailable);
        }

        self.framebuffer.fill(0xff10_1018);
        let side = (self.width.min(self.height) / 4).max(1);
        let x0 = self.frame % self.width.saturating_sub(side).max(1);
        let y0 = (self.height - side.min(self.height)) / 2;

        for y in y0..(y0 + side).min(self.height) {
            let row = y * self.width;
            for x in x0..(x0 + side).min(self.width) {
                // Cheap per-pixel shading so the work is not a plain memset
                let shade = ((x - x0) * 255 / side) as u32;
                self.framebuffer[row + x] = 0xff00_0000 | (shade << 16) | ((255 - shade) << 8) | 0x80;
            }
        }

        self.frame += 1;
        tokio::task::yield_now().await;
        Ok(())
    }
}
