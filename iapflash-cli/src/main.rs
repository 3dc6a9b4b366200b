//! iapflash CLI - Command-line tool for IAP serial bootloaders.
//!
//! ## Features
//!
//! - Download Intel HEX and raw binary images
//! - Inspect images (size, checksum, block layout)
//! - Interactive serial port selection
//! - Serial port watching
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Error classes with distinct exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or missing user input.
    #[error("{0}")]
    Usage(String),
    /// Unreadable or invalid configuration.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<iapflash::Error>() {
        Some(iapflash::Error::Cancelled) => 130,
        Some(iapflash::Error::UserInput(_)) => 2,
        Some(lib_err) if lib_err.is_device_error() => 4,
        _ => 1,
    }
}

/// iapflash - download firmware to IAP serial bootloaders.
///
/// Environment variables:
///   IAPFLASH_PORT              - Default serial port
///   IAPFLASH_BAUD              - Default baud rate (default: 115200)
///   IAPFLASH_ADDRESS           - Default base address for .bin images (default: 08010000)
///   IAPFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "iapflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  iapflash flash app.hex -p /dev/ttyUSB0\n  iapflash flash app.bin -a 08010000 -b 921600\n  iapflash info app.hex --json")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "IAPFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "IAPFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "IAPFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    pub(crate) confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    pub(crate) list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download a .hex or .bin firmware image to the device.
    Flash {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Base address for .bin images, in hex (e.g. 08010000).
        #[arg(short, long, env = "IAPFLASH_ADDRESS")]
        address: Option<String>,
    },

    /// Show information about a firmware file.
    Info {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print the serial port list whenever it changes (Ctrl-C to stop).
    WatchPorts {
        /// Polling interval in milliseconds.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
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
        "iapflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash { firmware, address } => {
            let config = load_config(cli)?;
            commands::flash::cmd_flash(cli, &config, firmware, address.as_deref())
        },
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::WatchPorts { interval_ms } => commands::ports::cmd_watch_ports(cli, *interval_ms),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Ok(Config::load()),
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;
    if !selected.is_known {
        debug!(
            "{} is not a known USB bridge, trying it anyway",
            selected.port.name()
        );
    }
    Ok(selected.port.name().to_string())
}
