//! Serial port discovery and classification.
//!
//! Enumerated ports are tagged with the USB bridge they sit behind, so the
//! CLI can prefer likely bootloader connections when the user did not name a
//! port.

use crate::error::{Result, UserInputError};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use crate::port::{NativePortEnumerator, PortEnumerator};
#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB bridge/device kinds commonly found on IAP-capable boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// STMicroelectronics virtual COM port (ST-LINK VCP, USB CDC bootloaders).
    StmVcp,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x0483, &[0x5740, 0x374B, 0x374E, 0x3752], DeviceKind::StmVcp),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StmVcp => "STM32 VCP",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check if this device kind should be preferred during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::StmVcp | Self::Ch340 | Self::Cp210x)
    }
}

/// A discovered serial port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Enumeration data.
    pub info: PortInfo,
    /// Classified device kind.
    pub device: DeviceKind,
}

impl DetectedPort {
    /// Classify enumerated port information.
    pub fn classify(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self { info, device }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Display label, see [`PortInfo::label`].
    pub fn label(&self) -> String {
        self.info.label()
    }
}

/// Detect all available ports with classification.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::classify(info);
                trace!(
                    "Found port: {} (VID: {:?}, PID: {:?}, Device: {:?})",
                    detected.info.name, detected.info.vid, detected.info.pid, detected.device
                );
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available ports (no native transport compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the best candidate from a list of detected ports.
///
/// Preference: high-priority bridges, then other known bridges, then the
/// first port listed.
pub fn pick_best_port(ports: &[DetectedPort]) -> Result<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.device.is_high_priority())
        .or_else(|| ports.iter().find(|p| p.device.is_known()))
        .or_else(|| ports.first())
        .ok_or_else(|| UserInputError::NoPortSelected.into())
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .info
                .description
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.info.name, device_info, product_info)
        })
        .collect()
}
