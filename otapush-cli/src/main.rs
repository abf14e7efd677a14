//! otapush CLI - Command-line tool for pushing OTA firmware updates to
//! microcontroller nodes over a serial link.
//!
//! ## Features
//!
//! - Push firmware images to direct, bus-forwarded and relayed targets
//! - Sliding-window transfer with live progress
//! - Serial port listing and a raw serial monitor
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use log::debug;
use otapush::{
    ChunkSource, Envelope, NativePort, PortEnumerator, SerialConfig, Transfer, TransferOptions,
};
use std::env;
use std::io;
use std::io::{Read as _, Write as _};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod config;

use config::Config;

/// otapush - Push firmware to serial-bus nodes over an OTA line protocol.
///
/// Environment variables:
///   OTAPUSH_PORT   - Default serial port
///   OTAPUSH_BAUD   - Default baud rate (default: 115200)
///   OTAPUSH_TARGET - Default bus id of the target node
#[derive(Parser)]
#[command(name = "otapush")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "OTAPUSH_PORT")]
    port: Option<String>,

    /// Baud rate of the serial link (default: 115200).
    #[arg(short, long, global = true, env = "OTAPUSH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Push a firmware image to a target node.
    Push {
        /// Path to the firmware image.
        firmware: PathBuf,

        /// Bus id of the target node (omit for a directly attached target).
        #[arg(short, long, env = "OTAPUSH_TARGET")]
        target: Option<u8>,

        /// Name of the coordinator's bus module (used with --target).
        #[arg(long)]
        bus: Option<String>,

        /// Name of the broadcast expander in front of the target; its
        /// traffic is paused for the duration of the transfer.
        #[arg(long)]
        expander: Option<String>,

        /// Maximum chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Maximum number of unacknowledged chunks in flight.
        #[arg(long)]
        window: Option<usize>,

        /// Open serial monitor after pushing.
        #[arg(long)]
        monitor: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open serial monitor.
    Monitor {
        /// Baud rate for monitoring (default: 115200).
        #[arg(long, default_value = "115200")]
        monitor_baud: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    match run() {
        Ok(()) => {},
        Err(e) => {
            if e.downcast_ref::<otapush::Error>()
                .is_some_and(|err| matches!(err, otapush::Error::Interrupted))
            {
                eprintln!("{} transfer interrupted", style("✗").red().bold());
                std::process::exit(130);
            }
            eprintln!("{} {e:#}", style("Error:").red().bold());
            std::process::exit(1);
        },
    }
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "otapush v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C requests a clean abort instead of killing the process; the
    // transfer notices through the interrupt checker, sends ABORT and
    // resumes any paused expander before unwinding.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .context("Failed to install Ctrl-C handler")?;
    }
    let checker_flag = Arc::clone(&interrupted);
    otapush::set_interrupt_checker(move || checker_flag.load(Ordering::Relaxed));

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Push {
            firmware,
            target,
            bus,
            expander,
            chunk_size,
            window,
            monitor,
        } => {
            cmd_push(
                &cli,
                &config,
                firmware,
                target.or(config.transfer.target),
                bus.as_deref(),
                expander.as_deref(),
                *chunk_size,
                *window,
            )?;
            if *monitor {
                eprintln!();
                cmd_monitor(&cli, &config, 115200)?;
            }
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        },
        Commands::Monitor { monitor_baud } => {
            cmd_monitor(&cli, &config, *monitor_baud)?;
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

/// Get serial port from CLI args or configuration.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .context("No serial port specified. Use --port, OTAPUSH_PORT or the config file.")
}

/// Build the transport envelope from CLI args and configuration.
fn build_envelope(
    config: &Config,
    target: Option<u8>,
    bus: Option<&str>,
    expander: Option<&str>,
) -> Envelope {
    let Some(target) = target else {
        return Envelope::Direct;
    };

    let module = bus
        .map(str::to_string)
        .or_else(|| config.transfer.bus.clone())
        .unwrap_or_else(|| "bus".to_string());

    let expander = expander
        .map(str::to_string)
        .or_else(|| config.transfer.expander.clone());

    match expander {
        Some(expander) => Envelope::Relayed {
            module,
            target,
            expander,
        },
        None => Envelope::Bus { module, target },
    }
}

/// Push command implementation.
#[allow(clippy::too_many_arguments)]
fn cmd_push(
    cli: &Cli,
    config: &Config,
    firmware: &PathBuf,
    target: Option<u8>,
    bus: Option<&str>,
    expander: Option<&str>,
    chunk_size: Option<usize>,
    window: Option<usize>,
) -> Result<()> {
    let (source, image_size) = ChunkSource::from_file(firmware)
        .with_context(|| format!("Failed to open firmware image {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({})",
            style("📦").cyan(),
            style(firmware.display()).cyan(),
            HumanBytes(image_size)
        );
    }

    let envelope = build_envelope(config, target, bus, expander);
    if !cli.quiet {
        let destination = match &envelope {
            Envelope::Direct => "directly attached target".to_string(),
            Envelope::Bus { module, target } => format!("target {target} via {module}"),
            Envelope::Relayed {
                module,
                target,
                expander,
            } => format!("target {target} via {module} (expander {expander})"),
        };
        eprintln!("{} Pushing to {destination}", style("ℹ").blue());
    }

    let port_name = get_port(cli, config)?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(115200);
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            baud
        );
    }

    let mut port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;

    let defaults = TransferOptions::default();
    let secs = std::time::Duration::from_secs;
    let opts = TransferOptions {
        chunk_size: chunk_size
            .or(config.transfer.chunk_size)
            .unwrap_or(defaults.chunk_size),
        window: window.or(config.transfer.window).unwrap_or(defaults.window),
        ready_timeout: config
            .transfer
            .ready_timeout
            .map_or(defaults.ready_timeout, secs),
        ack_timeout: config
            .transfer
            .ack_timeout
            .map_or(defaults.ack_timeout, secs),
        done_timeout: config
            .transfer
            .done_timeout
            .map_or(defaults.done_timeout, secs),
    };

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image_size);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut transfer = Transfer::new(&mut port, envelope, source, image_size, opts);
    let result = transfer.run(|acked, _total| pb.set_position(acked));

    match result {
        Ok(()) => {
            pb.finish_with_message("committed");
            if !cli.quiet {
                eprintln!(
                    "\n{} Firmware pushed and committed",
                    style("🎉").green().bold()
                );
            }
            Ok(())
        },
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e.into())
        },
    }
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = otapush::NativePortEnumerator::list_ports()?;

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }

    Ok(())
}

/// Monitor command implementation.
fn cmd_monitor(cli: &Cli, config: &Config, monitor_baud: u32) -> Result<()> {
    let port = get_port(cli, config)?;

    eprintln!(
        "{} Opening monitor on {} at {} baud",
        style("📡").cyan(),
        style(&port).green(),
        monitor_baud
    );
    eprintln!("{}", style("Press Ctrl-C to exit").dim());

    // Simple serial monitor
    let mut serial = serialport::new(&port, monitor_baud)
        .timeout(std::time::Duration::from_millis(100))
        .open()
        .with_context(|| format!("Failed to open serial port {port}"))?;

    let mut buf = [0u8; 1024];
    loop {
        if otapush::interrupt_requested() {
            eprintln!("\n{} Monitor stopped", style("✓").green());
            return Ok(());
        }

        match serial.read(&mut buf) {
            Ok(n) if n > 0 => {
                // Print received data
                let data = &buf[..n];
                if let Ok(s) = std::str::from_utf8(data) {
                    print!("{s}");
                } else {
                    // Hex dump for non-UTF8 data
                    for byte in data {
                        print!("{byte:02X} ");
                    }
                }
                io::stdout().flush().ok();
            },
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                // Timeout is expected, continue
            },
            Err(e) => {
                return Err(e).context("Serial monitor read error");
            },
            _ => {},
        }
    }
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
