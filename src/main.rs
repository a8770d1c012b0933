use anyhow::Result;
use clap::Parser;
use qrscan::{QrScanConfig, ScanHistory, ScanOrchestrator};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "qrscan")]
#[command(about = "Rust-based QR code scanner with camera scan sessions and scan history")]
#[command(version)]
#[command(long_about = "Opens a camera, polls frames for QR codes, classifies the decoded \
text, and keeps a short persistent history of successful scans. Point it at a V4L2 device \
on Linux or a stub:// device for a synthetic stream.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "qrscan.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without scanning")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Print the stored scan history and exit
    #[arg(long, help = "Print the persistent scan history, newest first, and exit")]
    show_history: bool,

    /// Keep scanning after each decoded payload
    #[arg(long, help = "Start a new scan session after every decoded payload")]
    continuous: bool,

    /// Override camera device path
    #[arg(long, value_name = "PATH", help = "Camera device path, e.g. /dev/video1 or stub://demo")]
    device: Option<String>,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting qrscan v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let mut config = match QrScanConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(device) = &args.device {
        config.camera.device = device.clone();
    }

    // Validate configuration if requested
    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    if args.show_history {
        print_history(&config).await?;
        return Ok(());
    }

    // Create the orchestrator and run scan sessions
    let mut orchestrator = ScanOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    let exit_code = orchestrator.run(args.continuous).await.map_err(|e| {
        error!("Scanner error during execution: {}", e);
        e
    })?;

    info!("qrscan exited with code: {}", exit_code);

    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("qrscan={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        }
        Some("compact") => {
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .boxed()
        }
        Some("pretty") | None => {
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

async fn print_history(config: &QrScanConfig) -> Result<()> {
    let history = ScanHistory::load(&config.history.path, config.history.capacity).await?;
    let entries = history.entries().await;

    if entries.is_empty() {
        println!("No scans recorded yet.");
        return Ok(());
    }

    for entry in entries {
        println!("{}  {}", entry.captured_at.format("%Y-%m-%d %H:%M:%S"), entry.text);
    }
    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Qrscan Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[camera]
# Camera device path. Use a stub:// path to force the synthetic camera.
device = "/dev/video0"
# Preferred camera facing: "rear" or "front" (hint only)
facing = "rear"
# Ideal capture resolution
ideal_width = 1280
ideal_height = 720
# Frames per second requested from the device
fps = 30
# Not-ready polls the synthetic camera reports before its first frame
stub_warmup_frames = 3

[scanner]
# Scheduling ticks per second for the scan poll loop. One decode attempt
# runs per tick: higher rates lower decode latency and raise CPU use.
tick_hz = 30

[history]
# Path of the JSON scan history file
path = "qrscan_history.json"
# Maximum number of entries retained, newest first
capacity = 10

[system]
# Event bus capacity
event_bus_capacity = 100
"#;

    println!("{}", default_config);
}
