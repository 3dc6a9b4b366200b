//! # iapflash
//!
//! A library for downloading firmware to in-application programming (IAP)
//! serial bootloaders.
//!
//! This crate provides the core functionality for talking to an IAP
//! bootloader over a serial port, including:
//!
//! - Intel HEX and raw binary image loading, split into 2048-byte blocks
//! - The block download protocol (handshake, mode entry, blocks, finalize)
//! - CRC32 image checksums
//! - Progress reporting, cancellation and serial port watching
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use iapflash::{DownloadRequest, Programmer, ProgressSink};
//!
//! struct Printer;
//!
//! impl ProgressSink for Printer {
//!     fn set_label(&mut self, text: &str) {
//!         println!("{text}");
//!     }
//!     fn set_progress(&mut self, current: u64, total: u64) {
//!         println!("{current}/{total}");
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut programmer = Programmer::new();
//!     programmer.load_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let request = DownloadRequest::from_user_input(Some("COM3"), 115200, "0x08010000")?;
//!         programmer.start_download(request, Box::new(Printer))?.join()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod lock;
pub mod port;
pub mod programmer;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod watcher;

// Re-exports
pub use device::{DetectedPort, DeviceKind};
pub use error::{Error, ProtocolError, Result, UserInputError};
pub use image::{BLOCK_SIZE, Block, FirmwareImage, ImageOrigin};
pub use lock::{PortGuard, PortLock};
pub use port::{Port, PortEnumerator, PortInfo, SerialConfig};
pub use programmer::{
    DEFAULT_BASE_ADDRESS, DownloadHandle, DownloadRequest, Programmer, format_base_address,
    parse_base_address,
};
pub use progress::{NoProgress, ProgressSink};
pub use protocol::{Crc32, crc32_accumulate};
pub use session::{CancelToken, DownloadSession, SessionPhase};
pub use watcher::PortWatcher;

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_resolve() {
        assert_eq!(BLOCK_SIZE, 2048);
        assert_eq!(DEFAULT_BASE_ADDRESS, 0x0801_0000);
        assert_eq!(crc32_accumulate(0, b"123456789"), 0x2DFD_2D88);
        assert_eq!(DeviceKind::from_vid_pid(0x0483, 0x5740), DeviceKind::StmVcp);
    }
}
