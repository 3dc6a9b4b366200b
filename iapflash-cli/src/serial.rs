//! Interactive serial port selection.
//!
//! Supports:
//! - Auto-detection of known USB bridges
//! - Interactive selection via dialoguer
//! - Ports from configuration
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    iapflash::{
        PortInfo,
        device::{DetectedPort, detect_ports, format_port_list},
        port::port_name_from_label,
    },
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port sits behind a known USB bridge.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn select_non_interactive_port(selection_ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    // 0 or >1 candidates cannot be resolved without a prompt.
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No serial port available"))?;
            Ok(SelectedPort {
                is_known: port.device.is_known(),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Found multiple serial ports; specify one with --port in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial port available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name_from_label(port_name)));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.device.is_known())
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports)
        },
        Ordering::Equal => {
            let port = selection_ports
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No serial port available"))?;
            let is_known = port.device.is_known();

            if is_known && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name(), port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial port available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; use --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name, falling back to a bare entry for unlisted names.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = detect_ports();

    let found = ports
        .iter()
        .find(|p| p.name() == name)
        .or_else(|| ports.iter().find(|p| p.name().eq_ignore_ascii_case(name)));

    let port = found
        .cloned()
        .unwrap_or_else(|| DetectedPort::classify(PortInfo::named(name)));
    SelectedPort {
        is_known: port.device.is_known(),
        port,
    }
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Known devices first
    ports.sort_by_key(|p| !p.device.is_known());

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                is_known: port.device.is_known(),
                port,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.label()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            is_known: port.device.is_known(),
            port,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, iapflash::device::DeviceKind};

    fn unknown(name: &str) -> DetectedPort {
        DetectedPort::classify(PortInfo::named(name))
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.list_all_ports);
        assert!(!options.non_interactive);
        assert!(!options.confirm_port);
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let result = select_non_interactive_port(vec![unknown("/dev/ttyUSB0"), unknown("/dev/ttyUSB1")]);
        let err = result.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![]).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_select_non_interactive_single_port() {
        let selected = select_non_interactive_port(vec![unknown("/dev/ttyUSB0")]).unwrap();
        assert_eq!(selected.port.name(), "/dev/ttyUSB0");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_explicit_port_label_resolves_to_name() {
        let options = SerialOptions {
            port: Some("Virtual COM (iapflash-test-port)".to_string()),
            ..Default::default()
        };
        let selected = select_serial_port(&options, &Config::default()).unwrap();
        assert_eq!(selected.port.name(), "iapflash-test-port");
        assert_eq!(selected.port.device, DeviceKind::Unknown);
    }

    #[test]
    fn test_config_port_is_used() {
        let mut config = Config::default();
        config.connection.serial = Some("iapflash-config-port".to_string());
        let selected = select_serial_port(&SerialOptions::default(), &config).unwrap();
        assert_eq!(selected.port.name(), "iapflash-config-port");
    }
}
