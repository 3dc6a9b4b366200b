//! Port listing and watching command implementations.

use {
    crate::{Cli, was_interrupted},
    anyhow::Result,
    console::style,
    iapflash::{
        PortLock, PortWatcher,
        device::{DetectedPort, detect_ports, pick_best_port},
    },
    std::{thread, time::Duration},
};

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name(),
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.info.vid,
        "pid": port.info.pid,
        "manufacturer": port.info.manufacturer,
        "description": port.info.description,
        "serial": port.info.serial_number,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available Serial Ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let description = port
            .info
            .description
            .as_deref()
            .map(|d| format!(" - {}", style(d).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(port.name()).cyan(),
            device_type,
            vid_pid,
            description
        );
    }

    if let Ok(best) = pick_best_port(&detected) {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(best.name()).cyan().bold()
        );
    }

    Ok(())
}

/// Watch ports command implementation: print the port list on every change
/// until Ctrl-C.
pub(crate) fn cmd_watch_ports(cli: &Cli, interval_ms: u64) -> Result<()> {
    let interval = Duration::from_millis(interval_ms.max(1));
    if !cli.quiet {
        eprintln!(
            "{} Watching serial ports every {} ms (Ctrl-C to stop)",
            style("👀").cyan(),
            interval.as_millis()
        );
    }

    let watcher = PortWatcher::spawn_native(PortLock::new(), interval, |ports| {
        if ports.is_empty() {
            println!("(no ports)");
        } else {
            println!("{}", ports.join(", "));
        }
    })?;

    while !was_interrupted() {
        thread::sleep(Duration::from_millis(50));
    }
    watcher.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, iapflash::PortInfo};

    #[test]
    fn test_port_json_fields() {
        let mut info = PortInfo::named("/dev/ttyUSB0");
        info.vid = Some(0x1A86);
        info.pid = Some(0x7523);
        let value = port_json(&DetectedPort::classify(info));
        assert_eq!(value["name"], "/dev/ttyUSB0");
        assert_eq!(value["known"], true);
        assert_eq!(value["vid"], 0x1A86);
        assert!(value["serial"].is_null());
    }
}
