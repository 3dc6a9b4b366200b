//! Serial channel abstraction.
//!
//! The download session talks to the device through the [`Port`] trait, so
//! the protocol logic stays independent of the OS transport. The native
//! implementation lives in [`native`] and is backed by the `serialport` crate;
//! tests drive the session with in-memory ports.
//!
//! ```text
//! +------------------+
//! | DownloadSession  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result, UserInputError};

/// Default baud rate offered to the user.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Fixed per-read timeout used for every acknowledgement.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1500);

/// Baud rates the bootloader can be driven at.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    110, 300, 600, 1_200, 2_400, 4_800, 9_600, 14_400, 19_200, 38_400, 57_600, 115_200, 128_000,
    230_400, 256_000, 460_800, 921_600, 1_228_800, 1_382_400,
];

/// Check a baud rate against [`SUPPORTED_BAUD_RATES`].
pub fn validate_baud_rate(baud_rate: u32) -> Result<u32> {
    if SUPPORTED_BAUD_RATES.contains(&baud_rate) {
        Ok(baud_rate)
    } else {
        Err(UserInputError::UnsupportedBaudRate(baud_rate).into())
    }
}

/// Serial port configuration.
///
/// The link is always 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration with the fixed read timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: READ_TIMEOUT,
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// Human-readable description (USB product string, if available).
    pub description: Option<String>,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            vid: None,
            pid: None,
            manufacturer: None,
            serial_number: None,
        }
    }

    /// Display label: `"<description> (<name>)"`, or just the name.
    pub fn label(&self) -> String {
        match self.description.as_deref() {
            Some(desc) if !desc.is_empty() => format!("{desc} ({})", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Recover the port name from a label produced by [`PortInfo::label`].
pub fn port_name_from_label(label: &str) -> &str {
    let label = label.trim();
    match (label.rfind('('), label.strip_suffix(')')) {
        (Some(open), Some(inner)) => inner[open + 1..].trim(),
        _ => label,
    }
}

/// Duplex byte channel to the bootloader.
pub trait Port: Read + Write + Send {
    /// Discard any buffered input.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// Closing an already closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf).map_err(Error::PortIo)?;
        std::io::Write::flush(self).map_err(Error::PortIo)
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Labels of all available ports, see [`PortInfo::label`].
    fn list_labels() -> Result<Vec<String>> {
        Ok(Self::list_ports()?
            .iter()
            .map(PortInfo::label)
            .collect())
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
