//! Flash command implementation.

use {
    crate::{Cli, CliError, config::Config, get_port, use_fancy_output, was_interrupted},
    anyhow::{Context, Result},
    console::style,
    iapflash::{
        DEFAULT_BASE_ADDRESS, DownloadRequest, Error as IapError, FirmwareImage, ImageOrigin,
        ProgressSink, Programmer, format_base_address, port::DEFAULT_BAUD,
    },
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    std::{path::Path, thread, time::Duration},
};

/// How often the foreground thread checks for Ctrl-C while the worker runs.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Renders session progress on an indicatif bar.
struct BarSink {
    pb: ProgressBar,
}

impl ProgressSink for BarSink {
    fn set_label(&mut self, text: &str) {
        self.pb.set_message(text.to_string());
    }

    fn set_progress(&mut self, current: u64, total: u64) {
        self.pb.set_length(total);
        self.pb.set_position(current);
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Base address text: explicit flag or env, then the HEX start address, then
/// config, then the default.
fn resolve_base_address(flag: Option<&str>, image: &FirmwareImage, config: &Config) -> String {
    if let Some(flag) = flag {
        return flag.to_string();
    }
    if let Some(suggested) = image.suggested_base_address() {
        return format_base_address(suggested);
    }
    config
        .download
        .base_address
        .clone()
        .unwrap_or_else(|| format_base_address(DEFAULT_BASE_ADDRESS))
}

fn resolve_baud(cli_baud: Option<u32>, config: &Config) -> u32 {
    cli_baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

fn print_summary(image: &FirmwareImage, path: &Path) {
    eprintln!(
        "{} Loaded {} ({})",
        style("📦").cyan(),
        path.display(),
        image.origin.name()
    );
    eprintln!("    Size:   {} Bytes", image.total_bytes);
    eprintln!("    CRC32:  {}", image.checksum_hex());
    eprintln!("    Blocks: {}", image.block_count());
    if let Some(address) = image.suggested_base_address() {
        eprintln!("    Start:  0x{}", format_base_address(address));
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    address: Option<&str>,
) -> Result<()> {
    let mut programmer = Programmer::new();
    let image = programmer
        .load_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    if !cli.quiet {
        print_summary(image, firmware);
    }
    let origin = image.origin;
    let base_address = resolve_base_address(address, image, config);

    let port = get_port(cli, config)?;
    let request =
        DownloadRequest::from_user_input(Some(&port), resolve_baud(cli.baud, config), &base_address)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            request.port,
            request.baud_rate
        );
        if origin == ImageOrigin::Bin {
            eprintln!(
                "    Base address: 0x{}",
                format_base_address(request.base_address)
            );
        }
    }

    ensure_not_interrupted()?;

    let pb = progress_bar(cli.quiet);
    let handle = programmer.start_download(request, Box::new(BarSink { pb: pb.clone() }))?;

    let mut cancel_sent = false;
    while !handle.is_finished() {
        if was_interrupted() && !cancel_sent {
            debug!("Ctrl-C received, cancelling after the current block");
            handle.cancel();
            cancel_sent = true;
        }
        thread::sleep(INTERRUPT_POLL);
    }

    match handle.join() {
        Ok(()) => {
            pb.finish_with_message("Complete");
            if !cli.quiet {
                eprintln!("\n{} Download completed", style("🎉").green().bold());
            }
            Ok(())
        },
        Err(IapError::Cancelled) => {
            pb.abandon();
            Err(CliError::Cancelled("Download cancelled".to_string()).into())
        },
        Err(e) => {
            pb.abandon();
            Err(anyhow::Error::from(e).context("Download failed"))
        },
    }
}
