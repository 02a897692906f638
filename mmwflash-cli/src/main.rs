//! mmwflash CLI - Command-line tool for flashing mmWave radar devices.
//!
//! ## Features
//!
//! - Flash one or more firmware images through the ROM bootloader
//! - Serial flash, SRAM and EEPROM targets
//! - Port lookup from `.ufsettings`, TOML config and environment variables
//! - Ctrl-C cancellation between chunks

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use mmwflash::{
    BootloaderSession, FlashOptions, Flasher, NativePortEnumerator, NativePortOpener, Outcome,
    PartNumber, PortEnumerator, SerialConfig, StorageTarget, port::DEFAULT_BAUD,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod config;
mod reporter;

use config::{Config, resolve_port};
use reporter::TerminalReporter;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

const DEFAULT_FIRMWARE: &str = "user_files/images/vital_signs_tracking_6843AOP_demo.bin";
const DEFAULT_SETTINGS: &str = "user_files/settings/generated.ufsettings";
const DEFAULT_PART: &str = "IWR68";

/// mmwflash - Flash mmWave radar devices through their ROM bootloader.
///
/// Environment variables:
///   MMWFLASH_PORT   - Default serial port
///   MMWFLASH_BAUD   - Default baud rate (default: 115200)
///   MMWFLASH_PART   - Default part number (default: IWR68)
#[derive(Parser)]
#[command(name = "mmwflash")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Firmware image to download (repeat for several; order is significant).
    #[arg(short, long = "firmware", value_name = "PATH", default_value = DEFAULT_FIRMWARE)]
    firmware: Vec<PathBuf>,

    /// Skip erasing the storage before downloading.
    #[arg(long)]
    no_format: bool,

    /// Storage to write to.
    #[arg(short, long, value_enum)]
    storage: Option<StorageArg>,

    /// Serial port.
    #[arg(short = 'c', long = "com", env = "MMWFLASH_PORT")]
    port: Option<String>,

    /// Part number of the device (e.g. IWR68, AWR18).
    #[arg(long, env = "MMWFLASH_PART")]
    part: Option<String>,

    /// Baud rate.
    #[arg(short, long, env = "MMWFLASH_BAUD")]
    baud: Option<u32>,

    /// Handshake timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,

    /// `.ufsettings` file naming the serial port.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SETTINGS)]
    settings: PathBuf,

    /// CONFIG image appended for pre-PG3 parts that need one.
    #[arg(long, value_name = "PATH")]
    config_blob: Option<PathBuf>,

    /// Command run while break is held to reset the board.
    #[arg(long, value_name = "CMD")]
    reset_command: Option<String>,

    /// Skip files whose header is not recognized instead of failing.
    #[arg(long)]
    skip_unrecognized: bool,

    /// Fail when the device rejects the erase.
    #[arg(long)]
    strict_erase: bool,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Verbose output (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress progress output).
    #[arg(short, long)]
    quiet: bool,

    /// Path to a config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Storage targets accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageArg {
    /// Serial flash.
    Sflash,
    /// On-chip SRAM.
    Sram,
    /// EEPROM.
    Eeprom,
}

impl From<StorageArg> for StorageTarget {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Sflash => Self::Sflash,
            StorageArg::Sram => Self::Sram,
            StorageArg::Eeprom => Self::Eeprom,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

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

    if cli.list_ports {
        return cmd_list_ports();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    match cmd_flash(&cli, &config, interrupted)? {
        Outcome::Completed => Ok(()),
        Outcome::Cancelled => {
            eprintln!("{} Flashing cancelled", style("!").yellow());
            std::process::exit(1);
        },
    }
}

fn storage_target(cli: &Cli, config: &Config) -> Result<StorageTarget> {
    if let Some(storage) = cli.storage {
        return Ok(storage.into());
    }
    match config.storage.as_deref() {
        Some(name) => name
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid storage in config file"),
        None => Ok(StorageTarget::default()),
    }
}

fn check_firmware(files: &[PathBuf]) -> Result<()> {
    for file in files {
        if !Path::new(file).is_file() {
            bail!("Firmware file not found: {}", file.display());
        }
    }
    Ok(())
}

fn cmd_flash(cli: &Cli, config: &Config, interrupted: Arc<AtomicBool>) -> Result<Outcome> {
    check_firmware(&cli.firmware)?;

    let port = resolve_port(cli.port.as_deref(), &cli.settings, config);
    let baud = cli.baud.or(config.baud).unwrap_or(DEFAULT_BAUD);
    let part = cli
        .part
        .clone()
        .or_else(|| config.part.clone())
        .unwrap_or_else(|| DEFAULT_PART.to_string());
    let timeout = Duration::from_secs(cli.timeout);

    let options = FlashOptions {
        storage: storage_target(cli, config)?,
        format: !cli.no_format,
        config_blob: cli.config_blob.clone(),
        reset_command: cli.reset_command.clone(),
        skip_unrecognized: cli.skip_unrecognized,
        strict_erase: cli.strict_erase,
        timeout,
        ..FlashOptions::default()
    };
    debug!("Flash options: {options:?}");

    eprintln!(
        "{} Flashing {} to {} on {} @ {} baud",
        style("→").cyan(),
        part,
        options.storage,
        style(&port).green(),
        baud
    );

    let show_progress = !cli.quiet && STDERR_IS_TTY.load(Ordering::Relaxed);
    let reporter = TerminalReporter::new(show_progress, interrupted);
    let serial = SerialConfig::new(port, baud).with_timeout(timeout);
    let session = BootloaderSession::new(NativePortOpener, reporter, serial);
    let mut flasher = Flasher::new(session, options);

    let result = flasher.run(PartNumber::new(&part), &cli.firmware);
    let reporter = flasher.session().reporter();
    match result {
        Ok(Outcome::Completed) => {
            reporter.finish();
            eprintln!("{} Flashing completed", style("✓").green());
            Ok(Outcome::Completed)
        },
        Ok(Outcome::Cancelled) => {
            reporter.abandon();
            Ok(Outcome::Cancelled)
        },
        Err(e) => {
            reporter.abandon();
            Err(e).context("Flashing failed")
        },
    }
}

fn cmd_list_ports() -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to list serial ports")?;

    eprintln!("{}", style("Available serial ports:").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let product = port.product.as_deref().unwrap_or("");
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        println!("  {}{} {}", style(&port.name).green(), vid_pid, product);
    }
    Ok(())
}
