use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use vr_runtime_core::device_token::ReportKind;
use vr_runtime_core::ipc::{publish_frame, resolve_frame, IpcRingBuffer};
use vr_runtime_core::registry::PluginRegistry;
use vr_runtime_core::simulation::{SyntheticCameraPlugin, SyntheticScene};
use vr_runtime_core::tracking::{TrackingPipeline, WeakPerspectiveSolver};
use vr_runtime_core::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "vr_tracker_server")]
#[command(about = "Beacon tracking server with shared-memory frame transport", long_about = None)]
struct Args {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Shared memory segment name
    #[arg(long)]
    ring_name: Option<String>,

    /// Ring buffer slot count
    #[arg(long)]
    entries: Option<usize>,

    /// Ring buffer slot size in bytes
    #[arg(long)]
    entry_size: Option<usize>,

    /// Never use shared memory; send frames inline
    #[arg(long)]
    inline: bool,
}

#[derive(Default)]
struct Stats {
    frames: u64,
    shared_frames: u64,
    inline_frames: u64,
    resolved_frames: u64,
    corrections: u64,
    gyro_reports: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(name) = &args.ring_name {
        config.ring_buffer.name = name.clone();
    }
    if let Some(entries) = args.entries {
        config.ring_buffer.entries = entries;
    }
    if let Some(entry_size) = args.entry_size {
        config.ring_buffer.entry_size = entry_size;
    }
    config.validate()?;

    println!("[{}] VR Tracker Server Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Process model: {:?}", config.filter.process_model);
    println!("  Beacon table: {:?}", config.beacons.table);
    println!(
        "  Transport: {}",
        if args.inline { "inline" } else { "shared memory" }
    );

    let patterns = config.beacons.pattern_strings();
    let identifier = Arc::new(config.beacons.build_identifier()?);
    let scene = SyntheticScene::from_patterns(patterns);
    let solver = WeakPerspectiveSolver {
        focal_length_px: scene.focal_length_px,
        ..WeakPerspectiveSolver::default()
    };
    let mut pipeline = TrackingPipeline::new(
        identifier,
        scene.layout.clone(),
        config.filter.clone(),
        config.beacons.keep_ids,
    );

    let mut registry = PluginRegistry::new();
    registry.register(Box::new(SyntheticCameraPlugin::new(
        scene,
        config.device.frame_rate_hz,
        config.device.channel_capacity,
    )))?;
    let mut tokens = registry.detect_all();
    println!("[{}] {} device(s) detected", ts_now(), tokens.len());

    let ring = if args.inline {
        None
    } else {
        match IpcRingBuffer::create(&config.ring_buffer.options()) {
            Ok(ring) => Some(ring),
            Err(e) => {
                log::warn!("Shared memory unavailable, sending frames inline: {}", e);
                None
            }
        }
    };
    let mut consumer_ring: Option<Arc<IpcRingBuffer>> = None;

    let mut ticker = interval(Duration::from_secs_f64(1.0 / config.device.frame_rate_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let start = Instant::now();
    let mut last_status = Instant::now();
    let mut stats = Stats::default();

    println!("[{}] Starting tracking loop...", ts_now());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("[{}] Ctrl-C received, stopping...", ts_now());
                break;
            }
            _ = ticker.tick() => {}
        }

        if args.duration > 0 && start.elapsed().as_secs() >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        for token in &tokens {
            for report in token.poll() {
                match report.kind {
                    ReportKind::Camera(frame) => {
                        let transport =
                            publish_frame(ring.as_ref(), frame.metadata, report.sensor, &frame.image);
                        if transport.is_shared() {
                            stats.shared_frames += 1;
                        } else {
                            stats.inline_frames += 1;
                        }
                        // Loop the frame back through the consumer path
                        let resolved = resolve_frame(&transport, |opts| {
                            if consumer_ring.is_none() {
                                consumer_ring = IpcRingBuffer::find(opts).ok();
                            }
                            consumer_ring.clone()
                        });
                        if resolved.as_deref() == Some(frame.image.as_slice()) {
                            stats.resolved_frames += 1;
                        }

                        let outcome = pipeline.process_frame(report.timestamp, &frame.blobs, &solver);
                        stats.frames += 1;
                        if outcome.corrected {
                            stats.corrections += 1;
                        }
                        log::debug!(
                            "frame {} pose {}",
                            frame.metadata.timestamp_us,
                            serde_json::to_string(&outcome.pose)?
                        );
                    }
                    ReportKind::AngularVelocity { value, variance } => {
                        pipeline.body_mut().observe_angular_velocity(value, variance);
                        stats.gyro_reports += 1;
                    }
                }
            }
        }

        for e in registry.update_all() {
            log::warn!("{}", e);
        }

        if last_status.elapsed() >= Duration::from_secs(1) {
            let pose = pipeline.body().pose();
            println!(
                "[{}] frames={} shm={} inline={} resolved={} corrections={} gyro={} leds={} resets={} pos=({:.3}, {:.3}, {:.3})",
                ts_now(),
                stats.frames,
                stats.shared_frames,
                stats.inline_frames,
                stats.resolved_frames,
                stats.corrections,
                stats.gyro_reports,
                pipeline.leds().len(),
                pipeline.body().resets(),
                pose.position.0,
                pose.position.1,
                pose.position.2,
            );
            log::debug!("plugins: {}", registry.status_report());
            last_status = Instant::now();
        }
    }

    for token in &mut tokens {
        if let Err(e) = token.shutdown() {
            log::warn!("{}: {}", token.name(), e);
        }
    }
    drop(tokens);
    registry.teardown();

    println!(
        "[{}] Stopped after {} frames ({} corrected, {} via shared memory)",
        ts_now(),
        stats.frames,
        stats.corrections,
        stats.shared_frames
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
