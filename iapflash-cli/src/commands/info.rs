//! Firmware info command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    iapflash::{FirmwareImage, format_base_address},
    std::path::Path,
};

fn load(firmware: &Path) -> Result<FirmwareImage> {
    FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    if json {
        return cmd_info_json(firmware);
    }

    eprintln!(
        "{} Loading {}",
        style("📦").cyan(),
        firmware.display()
    );
    let image = load(firmware)?;

    eprintln!("\n{}", style("Firmware Image").bold().underlined());
    eprintln!("  Format:       {}", image.origin.name());
    eprintln!("  Data bytes:   {}", image.total_bytes);
    eprintln!("  CRC32:        {}", image.checksum_hex());
    eprintln!("  Blocks:       {}", image.block_count());
    match image.suggested_base_address() {
        Some(address) => eprintln!("  Start:        0x{}", format_base_address(address)),
        None => eprintln!(
            "  Start:        {}",
            style("relative (set with --address)").dim()
        ),
    }

    if !image.is_empty() {
        eprintln!("\n{}", style("Blocks").bold().underlined());
        for (i, block) in image.blocks.iter().enumerate() {
            eprintln!("  [{:3}] 0x{:08X}", i + 1, block.address());
        }
    }

    Ok(())
}

/// Info command `--json` output: structured JSON to stdout.
fn cmd_info_json(firmware: &Path) -> Result<()> {
    let image = load(firmware)?;
    println!("{}", serde_json::to_string_pretty(&info_json(firmware, &image))?);
    Ok(())
}

fn info_json(firmware: &Path, image: &FirmwareImage) -> serde_json::Value {
    let blocks: Vec<String> = image
        .blocks
        .iter()
        .map(|b| format!("0x{:08X}", b.address()))
        .collect();

    serde_json::json!({
        "ok": true,
        "data": {
            "path": firmware.display().to_string(),
            "format": image.origin.name(),
            "total_bytes": image.total_bytes,
            "checksum": image.checksum_hex(),
            "block_count": image.block_count(),
            "suggested_base_address": image
                .suggested_base_address()
                .map(|a| format!("0x{}", format_base_address(a))),
            "blocks": blocks,
        }
    })
}
