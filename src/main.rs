use anyhow::{Context, Result};
use clap::Parser;
use depthcam::device::SimulatedDriver;
use depthcam::{
    CaptureOptions, CaptureSynchronizer, DepthcamConfig, DepthcamError, FrameSet, Modality,
    StreamMode, SyncError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "depthcam")]
#[command(about = "Synchronized RGB, IR and depth capture from a 3D camera")]
#[command(version)]
#[command(long_about = "Captures self-consistent sets of color, infrared and depth frames \
from a depth camera whose driver delivers every stream on its own callback thread. \
Runs against the built-in simulated driver and prints a summary of every frame set.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "depthcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening a device")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Write logs to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Frame sets to capture, 0 runs until Ctrl-C
    #[arg(short = 'n', long, default_value_t = 30)]
    frames: u64,

    /// Stream mode overriding the configured one, e.g. "rgb|depth"
    #[arg(short, long, value_name = "MODE")]
    mode: Option<StreamMode>,

    /// Mode to alternate with the primary mode
    #[arg(long, value_name = "MODE")]
    alternate_mode: Option<StreamMode>,

    /// Frame sets captured before switching to the other mode
    #[arg(long, default_value_t = 10)]
    swap_every: u64,

    /// Print final statistics as JSON
    #[arg(long)]
    stats_json: bool,
}

/// What the capture loop should do
#[derive(Debug, Clone)]
struct CapturePlan {
    frames: u64,
    primary: StreamMode,
    alternate: Option<StreamMode>,
    swap_every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = init_logging(&args)?;

    info!("Starting depthcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DepthcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let plan = CapturePlan {
        frames: args.frames,
        primary: args.mode.unwrap_or(config.device.stream_mode),
        alternate: args.alternate_mode,
        swap_every: args.swap_every,
    };

    let driver = SimulatedDriver::from_config(&config.simulator, config.device.output_mode());
    let sync = Arc::new(
        CaptureSynchronizer::open(&driver, &CaptureOptions::from_config(&config))
            .context("Failed to open capture device")?,
    );

    let token = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(token.clone()));

    let captured = run(Arc::clone(&sync), plan, token.clone()).await;
    token.cancel();
    sync.shutdown();

    let stats = sync.stats();
    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "releases={} rgb={} ir={} depth={} dropped={} late={} coalesced={} switches={} timeouts={}",
            stats.releases,
            stats.rgb_frames,
            stats.ir_frames,
            stats.depth_frames,
            stats.frames_dropped,
            stats.late_frames,
            stats.signals_coalesced,
            stats.mode_switches,
            stats.timeouts
        );
    }

    let captured = captured?;
    info!("Captured {} frame sets", captured);
    Ok(())
}

async fn watch_ctrl_c(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Received Ctrl-C, stopping capture");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        },
        _ = token.cancelled() => {}
    }
}

/// Drive the blocking capture loop on the blocking pool, cancelling its
/// rendezvous when `token` fires.
async fn run(sync: Arc<CaptureSynchronizer>, plan: CapturePlan, token: CancellationToken) -> Result<u64> {
    let canceller = sync.canceller();
    let bridge = tokio::spawn({
        let token = token.clone();
        async move {
            token.cancelled().await;
            canceller.cancel();
        }
    });

    let worker = tokio::task::spawn_blocking(move || capture_loop(&sync, &plan, &token));
    let result = worker.await.context("Capture task panicked")?;
    bridge.abort();
    result
}

fn capture_loop(
    sync: &CaptureSynchronizer,
    plan: &CapturePlan,
    token: &CancellationToken,
) -> Result<u64> {
    let mut mode = plan.primary;
    sync.request_mode(mode)?;
    info!("Capturing {} from {}", mode, sync.info().connection_string);

    let mut captured = 0u64;
    while plan.frames == 0 || captured < plan.frames {
        if token.is_cancelled() {
            break;
        }

        match sync.poll_latest() {
            Ok(set) => {
                captured += 1;
                println!("{}", describe(&set));

                if let Some(alternate) = plan.alternate {
                    if plan.swap_every > 0 && captured % plan.swap_every == 0 {
                        mode = if mode == plan.primary { alternate } else { plan.primary };
                        sync.request_mode(mode)?;
                        info!("Switched to {}", mode);
                    }
                }
            }
            Err(DepthcamError::Sync(SyncError::Cancelled)) => {
                info!("Capture cancelled");
                break;
            }
            Err(e) if e.is_recoverable() => {
                warn!("{}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(captured)
}

/// One-line summary of a frame set
fn describe(set: &FrameSet) -> String {
    let mut line = format!("#{} {}", set.sequence, set.mode);
    for modality in set.mode.modalities() {
        if let Some(id) = set.frame_id(modality) {
            line.push_str(&format!(" {}={}", modality.name().to_lowercase(), id));
        }
    }

    if let Some(depth) = &set.depth {
        let (width, height) = depth.dimensions();
        if let Some(center) = depth.get(width / 2, height / 2, 0) {
            line.push_str(&format!(" center={:.3}m", center));
        }
    }
    if set.contains(Modality::Rgb) && set.contains(Modality::Depth) {
        line.push_str(" aligned");
    }
    line
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("depthcam={}", log_level)));

    let (writer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = args.log_file.is_none();

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_names(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Depthcam Configuration File");
    println!("# Every key can be overridden with DEPTHCAM_<SECTION>__<KEY>, e.g. DEPTHCAM_DEVICE__FPS=15");
    println!("# device.resolution is one of QVGA, VGA, XGA, SXGA; SXGA runs at most 15fps");
    println!("# device.stream_mode combines RGB, IR and DEPTH with '|'");
    println!("# sync.poll_timeout_ms = 0 waits indefinitely");
    println!();
    println!("{}", toml::to_string_pretty(&DepthcamConfig::default())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthcam::config::SimulatorConfig;
    use depthcam::OutputMode;
    use std::time::Duration;

    fn open_simulated(fps: u32) -> Arc<CaptureSynchronizer> {
        let config = SimulatorConfig {
            device_count: 1,
            has_ir: true,
            registration_supported: true,
            drop_every_nth: 0,
        };
        let mode = OutputMode::new(8, 6, fps);
        let driver = SimulatedDriver::from_config(&config, mode);
        Arc::new(CaptureSynchronizer::open(&driver, &CaptureOptions::new(mode)).unwrap())
    }

    #[tokio::test]
    async fn test_run_alternates_modes() {
        let sync = open_simulated(200);
        let plan = CapturePlan {
            frames: 4,
            primary: StreamMode::DEPTH_RGB,
            alternate: Some(StreamMode::IR),
            swap_every: 2,
        };

        let captured = run(Arc::clone(&sync), plan, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(captured, 4);

        let stats = sync.stats();
        assert_eq!(stats.releases, 4);
        assert_eq!(stats.mode_switches, 3);
        assert_eq!(sync.requested_mode(), StreamMode::DEPTH_RGB);
    }

    #[tokio::test]
    async fn test_cancellation_stops_unbounded_run() {
        // One frame per second keeps the loop blocked in the rendezvous
        let sync = open_simulated(1);
        let plan = CapturePlan {
            frames: 0,
            primary: StreamMode::DEPTH_RGB,
            alternate: None,
            swap_every: 0,
        };
        let token = CancellationToken::new();

        let handle = tokio::spawn(run(Arc::clone(&sync), plan, token.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let captured = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(captured <= 1);
    }

    #[test]
    fn test_describe_frame_set() {
        let sync = open_simulated(200);
        let set = sync
            .await_and_collect(StreamMode::DEPTH, Some(Duration::from_secs(2)))
            .unwrap();
        let line = describe(&set);
        assert!(line.starts_with(&format!("#{} DEPTH depth=", set.sequence)));
        assert!(line.contains("center="));
    }
}
