//! # Anima - Adaptive Rendering Resource Manager
//!
//! Command-line front end for benchmarking the device, simulating the
//! adaptive quality loop on a synthetic frame stream, and loading an asset
//! manifest through the budgeted scheduler.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rand::Rng;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anima::assets::{AssetManifest, AssetScheduler, FileFetcher};
use anima::benchmark::{CapabilityBenchmark, SoftwareFrameProbe};
use anima::context::{ContextOptions, HeadlessBackend};
use anima::monitor::SystemMemoryTelemetry;
use anima::quality::QualityTier;
use anima::{AdaptiveRuntime, AnimaConfig, EventBus, ResourceEvent};

#[derive(Parser)]
#[command(name = "anima")]
#[command(about = "Adaptive rendering resource manager: benchmark, simulate and load assets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/anima/anima.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Score the device and report the quality tier it maps to
    Benchmark {
        /// Skip live probes and estimate from device specs
        #[arg(long)]
        estimate: bool,
    },

    /// Drive the adaptive runtime with a synthetic frame stream
    Simulate {
        /// Number of frames to feed
        #[arg(long, default_value_t = 1200)]
        frames: u32,

        /// Nominal frame time in milliseconds
        #[arg(long, default_value_t = 16.7)]
        frame_ms: f32,

        /// Uniform jitter applied to every frame (ms)
        #[arg(long, default_value_t = 2.0)]
        jitter: f32,

        /// Frame after which frames slow down to `degraded_ms`
        #[arg(long)]
        degrade_after: Option<u32>,

        /// Frame time once degraded (ms)
        #[arg(long, default_value_t = 50.0)]
        degraded_ms: f32,

        /// Start at this tier instead of benchmarking
        #[arg(long)]
        tier: Option<QualityTier>,
    },

    /// Load every asset of a TOML manifest
    Load {
        /// Manifest listing the assets
        manifest: PathBuf,

        /// Directory asset URLs are resolved against
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configuration is read first so its debug flag can shape the logger
    let loaded = AnimaConfig::load(&cli.config);
    let debug = wants_debug(cli.debug, &loaded);

    // Initialize logging
    if debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Anima - Adaptive Rendering Resource Manager");
    info!("📄 Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "🔧 Built {} for {} [{}] ({})",
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE"),
        env!("BUILD_PROFILE"),
        option_env!("GIT_COMMIT").unwrap_or("unknown commit")
    );

    let config = match loaded {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            AnimaConfig::default()
        }
    };

    match cli.command.clone().unwrap_or(Command::Benchmark { estimate: false }) {
        Command::Benchmark { estimate } => run_benchmark(config, estimate, cli.json).await,
        Command::Simulate {
            frames,
            frame_ms,
            jitter,
            degrade_after,
            degraded_ms,
            tier,
        } => {
            let plan = FramePlan {
                frames,
                frame_ms,
                jitter,
                degrade_after,
                degraded_ms,
            };
            run_simulation(config, plan, tier, cli.json).await
        }
        Command::Load { manifest, root } => run_load(config, &manifest, root, cli.json).await,
    }
}

/// Debug logging is on when the flag or a loaded config asks for it
fn wants_debug(flag: bool, loaded: &Result<AnimaConfig>) -> bool {
    flag || loaded.as_ref().is_ok_and(|config| config.general.debug)
}

async fn run_benchmark(mut config: AnimaConfig, estimate: bool, json_output: bool) -> Result<()> {
    if estimate {
        config.benchmark.live_profiling = false;
    }

    let mut benchmark = CapabilityBenchmark::new(&config.benchmark);
    let result = benchmark
        .run(&mut SoftwareFrameProbe::new(320, 240), &mut SystemMemoryTelemetry::new())
        .await;
    let tier = config.quality.preferred_tier.unwrap_or(result.initial_tier());

    if json_output {
        let output = json!({
            "benchmark": result,
            "device": benchmark.specs(),
            "tier": tier,
            "settings": tier.settings(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("CPU score:     {:>6.1}", result.cpu_score);
        println!("GPU score:     {:>6.1}", result.gpu_score);
        println!("Memory score:  {:>6.1}", result.memory_score);
        println!("Overall score: {:>6.1} ({:?})", result.overall_score, result.source);
        println!("Quality tier:  {}", tier);
        println!("Settings:      {:?}", tier.settings());
    }
    Ok(())
}

/// Synthetic frame stream for `simulate`
#[derive(Debug, Clone, Copy)]
struct FramePlan {
    frames: u32,
    frame_ms: f32,
    jitter: f32,
    degrade_after: Option<u32>,
    degraded_ms: f32,
}

impl FramePlan {
    fn frame_time(&self, index: u32, rng: &mut impl Rng) -> Duration {
        let base = match self.degrade_after {
            Some(after) if index >= after => self.degraded_ms,
            _ => self.frame_ms,
        };
        let jitter = if self.jitter > 0.0 {
            rng.gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f32((base + jitter).max(0.1) / 1000.0)
    }
}

async fn run_simulation(
    mut config: AnimaConfig,
    plan: FramePlan,
    tier: Option<QualityTier>,
    json_output: bool,
) -> Result<()> {
    if tier.is_some() {
        config.quality.preferred_tier = tier;
    }

    let mut benchmark = CapabilityBenchmark::new(&config.benchmark);
    let result = if tier.is_some() {
        benchmark.estimate()
    } else {
        benchmark
            .run(&mut SoftwareFrameProbe::new(320, 240), &mut SystemMemoryTelemetry::new())
            .await
    };

    let mut runtime = AdaptiveRuntime::new(&config, HeadlessBackend::default(), SystemMemoryTelemetry::new(), &result);
    let mut events = runtime.subscribe();
    runtime.announce_tier();

    let Some(canvas) = runtime.contexts_mut().acquire("main", ContextOptions::default()).context_id() else {
        warn!("🧯 No rendering context available, simulating in software fallback");
        return Ok(());
    };

    let mut rng = rand::thread_rng();
    let mut now = Instant::now();
    for index in 0..plan.frames {
        let frame = plan.frame_time(index, &mut rng);
        now += frame;
        runtime.contexts_mut().record_draw_calls(canvas, 12)?;
        for change in runtime.tick(frame, now).tier_changes {
            info!("🎚️ Frame {}: {} -> {} ({:?})", index, change.from, change.to, change.reason);
        }
    }

    let mut event_count = 0;
    while let Ok(event) = events.try_recv() {
        if let ResourceEvent::TierChanged { .. } | ResourceEvent::MemoryPressure { .. } = event {
            event_count += 1;
        }
    }

    let transitions: Vec<_> = runtime
        .quality()
        .history()
        .iter()
        .map(|change| json!({ "from": change.from, "to": change.to, "reason": change.reason }))
        .collect();

    if json_output {
        let output = json!({
            "final_tier": runtime.quality().tier(),
            "transitions": transitions,
            "monitor": runtime.monitor().stats(),
            "pool": runtime.contexts().stats(),
            "events": event_count,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let stats = runtime.monitor().stats();
        println!("Frames:        {}", stats.total_frames);
        println!(
            "Frame time:    avg {:.2} ms, min {:.2} ms, max {:.2} ms",
            stats.avg_frame_ms, stats.min_frame_ms, stats.max_frame_ms
        );
        println!("Rolling FPS:   {:.1}", stats.current_fps);
        println!("Missed frames: {}", stats.missed_frames);
        println!("Final tier:    {}", runtime.quality().tier());
        println!("Transitions:   {}", transitions.len().saturating_sub(1));
        println!("Events:        {}", event_count);
    }

    runtime.shutdown();
    Ok(())
}

async fn run_load(config: AnimaConfig, manifest_path: &Path, root: PathBuf, json_output: bool) -> Result<()> {
    let manifest = AssetManifest::load(manifest_path)?;
    info!("📦 {} assets listed in {}", manifest.assets.len(), manifest_path.display());

    let bus = EventBus::default();
    let mut scheduler = AssetScheduler::new(FileFetcher::new(root), &config.assets).with_events(bus);

    let mut tickets = Vec::new();
    let mut rejected = Vec::new();
    for descriptor in manifest.descriptors() {
        let key = descriptor.key();
        match scheduler.enqueue(descriptor) {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => {
                warn!("🚫 {}", e);
                rejected.push(json!({ "key": key.to_string(), "error": e.to_string() }));
            }
        }
    }

    // Each drain issues another round of deferred preloads
    loop {
        let report = scheduler.drain().await;
        if scheduler.queued_len() == 0 || report.issued.is_empty() {
            break;
        }
    }

    let results: Vec<_> = tickets
        .iter()
        .map(|ticket| match ticket.try_result() {
            Some(Ok(payload)) => json!({ "key": ticket.key().to_string(), "bytes": payload.bytes.len() }),
            Some(Err(e)) => json!({ "key": ticket.key().to_string(), "error": e.to_string() }),
            None => json!({ "key": ticket.key().to_string(), "state": "deferred" }),
        })
        .collect();

    if json_output {
        let output = json!({
            "results": results,
            "rejected": rejected,
            "stats": scheduler.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for result in results.iter().chain(rejected.iter()) {
            println!("{}", result);
        }
        let stats = scheduler.stats();
        println!(
            "Loaded {}, failed {}, retries {}, rejected {}",
            stats.loaded,
            stats.failed,
            stats.retries,
            stats.budget_rejections + rejected.len() as u64
        );
    }
    Ok(())
}
