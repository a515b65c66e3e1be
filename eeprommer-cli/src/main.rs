//! eeprommer CLI - Command-line tool for MEEPROMMER-style EEPROM programmers.
//!
//! ## Features
//!
//! - Dump, verify and write EEPROM contents from/to raw binary images
//! - Paged writes for chips with a page buffer
//! - ASCII hex dump to stdout
//! - Software data protection unlock and firmware version query
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::{Context, Result},
    clap::{Args, Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    eeprommer::{AckPollConfig, NativePort, OperationRequest, Programmer, SerialConfig, WriteMode},
    env_logger::Env,
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    },
};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or configuration (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Device contents differ from the image (exit code 1).
    #[error("Verify failed: {0} bytes differ")]
    Mismatch(usize),
}

/// eeprommer - Host-side tool for MEEPROMMER-style EEPROM programmers.
///
/// Environment variables:
///   EEPROMMER_PORT       - Serial port of the programmer
///   EEPROMMER_BAUD       - Baud rate (default: 460800)
///   EEPROMMER_SETTLE_MS  - Delay after opening the port (default: 2000)
#[derive(Parser)]
#[command(name = "eeprommer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Addresses and offsets are hexadecimal (e.g. 0x8000), sizes are in KiB.")]
struct Cli {
    /// Serial port of the programmer (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "EEPROMMER_PORT")]
    port: Option<String>,

    /// Baud rate [default: 460800].
    #[arg(short, long, global = true, env = "EEPROMMER_BAUD")]
    baud: Option<u32>,

    /// Delay after opening the port, in milliseconds [default: 2000].
    #[arg(long, global = true, env = "EEPROMMER_SETTLE_MS", value_name = "MS")]
    settle_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
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

/// EEPROM region and image file shared by the memory commands.
#[derive(Args, Debug, Clone)]
struct RegionArgs {
    /// First EEPROM address (hex).
    #[arg(short, long, default_value = "0", value_parser = parse_hex_u64)]
    address: u64,

    /// Offset into the image file (hex).
    #[arg(short, long, default_value = "0", value_parser = parse_hex_u64)]
    offset: u64,

    /// Number of KiB to transfer.
    #[arg(short, long, default_value_t = 512)]
    kbytes: u32,

    /// Raw binary image file.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

impl RegionArgs {
    /// Build the request handed to the programmer.
    fn request(&self, write_mode: WriteMode) -> OperationRequest {
        OperationRequest::new(self.address, self.kbytes)
            .with_offset(self.offset)
            .with_write_mode(write_mode)
    }

    /// The image file, or a usage error naming the command.
    fn require_file(&self, command: &str) -> Result<&PathBuf> {
        self.file
            .as_ref()
            .ok_or_else(|| CliError::Usage(format!("{command} needs an image file (--file)")).into())
    }
}

/// EEPROM range printed by `read`.
#[derive(Args, Debug, Clone)]
struct ReadArgs {
    /// First EEPROM address (hex).
    #[arg(short, long, default_value = "0", value_parser = parse_hex_u64)]
    address: u64,

    /// Number of KiB to print.
    #[arg(short, long, default_value_t = 512)]
    kbytes: u32,
}

impl ReadArgs {
    fn request(&self) -> OperationRequest {
        OperationRequest::new(self.address, self.kbytes)
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Dump EEPROM contents to a binary file.
    Dump {
        #[command(flatten)]
        region: RegionArgs,
    },

    /// Print EEPROM contents as hex, 16 bytes per line.
    Read {
        #[command(flatten)]
        range: ReadArgs,
    },

    /// Compare EEPROM contents with a binary file.
    Verify {
        #[command(flatten)]
        region: RegionArgs,
    },

    /// Write a binary file to the EEPROM, byte by byte.
    Write {
        #[command(flatten)]
        region: RegionArgs,

        /// Verify the written region afterwards.
        #[arg(long)]
        verify: bool,
    },

    /// Write a binary file to the EEPROM using page writes.
    WritePaged {
        #[command(flatten)]
        region: RegionArgs,

        /// Page size of the chip (32 for CAT28C*, 64 for AT28C*) [default: 32].
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=255))]
        page_size: Option<u16>,

        /// Verify the written region afterwards.
        #[arg(long)]
        verify: bool,
    },

    /// Disable the chip's software data protection.
    Unlock,

    /// Show the programmer firmware version.
    Version {
        /// Output the version as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Parse hexadecimal value (supports 0x prefix and underscores).
fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x00_80_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u64::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Resolve serial settings: flag/env first, then config file, then defaults.
fn serial_config(cli: &Cli, config: &Config) -> Result<SerialConfig> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or_else(|| {
            CliError::Usage(
                "No serial port given; use --port, EEPROMMER_PORT or [connection] port in \
                 eeprommer.toml"
                    .to_string(),
            )
        })?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(eeprommer::port::DEFAULT_BAUD);
    let settle = cli
        .settle_ms
        .map(Duration::from_millis)
        .or_else(|| config.settle_delay())
        .unwrap_or(eeprommer::port::DEFAULT_SETTLE_DELAY);

    Ok(SerialConfig::new(port, baud).with_settle_delay(settle))
}

/// Open the programmer described by the command line and config.
pub(crate) fn open_programmer(cli: &Cli, config: &Config) -> Result<Programmer<NativePort>> {
    let serial = serial_config(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&serial.port_name).green(),
            serial.baud_rate
        );
    }

    let mut ack_poll = AckPollConfig::default();
    if let Some(timeout) = config.ack_timeout() {
        ack_poll.timeout = timeout;
    }

    let programmer = Programmer::open(&serial)
        .with_context(|| format!("Failed to open programmer on {}", serial.port_name))?;
    Ok(programmer.with_ack_poll(ack_poll))
}

/// Create a byte progress bar on stderr, hidden when quiet or not a TTY.
pub(crate) fn progress_bar(cli: &Cli, total: u64, message: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("#>-"));
    pb.set_style(style);
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Mismatch(_) => 1,
        };
    }
    match err.downcast_ref::<eeprommer::Error>() {
        Some(eeprommer::Error::Config(_) | eeprommer::Error::FieldOverflow { .. }) => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
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
        "eeprommer v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Dump { region } => commands::memory::cmd_dump(cli, &config, region),
        Commands::Read { range } => commands::memory::cmd_read(cli, &config, range),
        Commands::Verify { region } => commands::memory::cmd_verify(cli, &config, region),
        Commands::Write { region, verify } => {
            commands::memory::cmd_write(cli, &config, region, WriteMode::Unpaged, *verify)
        },
        Commands::WritePaged {
            region,
            page_size,
            verify,
        } => {
            let page_size = page_size
                .or(config.write.page_size)
                .unwrap_or(WriteMode::DEFAULT_PAGE_SIZE);
            if page_size == 0 || page_size > 0xFF {
                return Err(CliError::Usage(format!(
                    "Page size {page_size} is out of range (1-255)"
                ))
                .into());
            }
            commands::memory::cmd_write(
                cli,
                &config,
                region,
                WriteMode::Paged { page_size },
                *verify,
            )
        },
        Commands::Unlock => commands::device::cmd_unlock(cli, &config),
        Commands::Version { json } => commands::device::cmd_version(cli, &config, *json),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}
