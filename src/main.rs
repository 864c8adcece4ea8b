use anyhow::Result;
use clap::Parser;
use picam_bot::camera::default_driver;
use picam_bot::{OutputFormat, PicamConfig, PicamOrchestrator};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "picam-bot")]
#[command(about = "Chat-driven photo and video capture for a single camera")]
#[command(version)]
#[command(long_about = "Takes photos and records short videos on request from chat users, \
keeps only the most recent files of each kind, and lets users list and fetch stored media. \
Messages are read line by line from stdin; replies are written to stdout.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "picam-bot.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the bot")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - prepare directories and camera driver, then exit
    #[arg(long, help = "Perform dry run - create media directories and exit without serving")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Write replies as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Chat id for console lines not addressed with @chat
    #[arg(long, value_name = "ID")]
    chat_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("# Picam bot configuration file");
        println!("# Values shown are the defaults");
        println!();
        println!("{}", PicamConfig::default().to_toml()?);
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting picam bot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PicamConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
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

    let driver = default_driver(&config.camera).map_err(|e| {
        error!("Failed to create camera driver: {}", e);
        e
    })?;

    let mut orchestrator = PicamOrchestrator::new(config, driver);
    if let Some(chat_id) = args.chat_id.as_deref() {
        orchestrator.set_chat_id(chat_id);
    }
    if args.json {
        orchestrator.set_output_format(OutputFormat::Json);
    }

    orchestrator.start().await?;

    if args.dry_run {
        info!("Dry run mode - media directories prepared, not serving");
        println!("✓ Dry run completed successfully");
        return Ok(());
    }

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Picam bot exited with code: {}", exit_code);
    drop(log_guard);

    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Interactions are kept at info unless quiet
    let interactions = if args.quiet { "error" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "picam_bot={},picam_bot::interactions={}",
            log_level, interactions
        ))
    });

    type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    // stdout carries replies, so logs go to stderr
    let console_layer: BoxedLayer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };
    layers.push(console_layer.with_filter(env_filter).boxed());

    let guard = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "picam-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer: BoxedLayer = if args.log_format.as_deref() == Some("json") {
                fmt::layer().json().with_ansi(false).with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            // The file keeps debug detail whatever the console level
            layers.push(file_layer.with_filter(EnvFilter::new("picam_bot=debug")).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).init();

    Ok(guard)
}
