//! Error types for iapflash.

use std::io;
use thiserror::Error;

/// Result type for iapflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for iapflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported firmware file format (only `.bin` and `.hex` are accepted).
    #[error("Unsupported file format: {0}")]
    Format(String),

    /// An Intel HEX record whose fields could not be decoded.
    #[error("Invalid HEX record at line {line}: {reason}")]
    InvalidHex {
        /// 1-based line number in the source file.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// A raw binary image whose block offsets do not fit in 32 bits.
    #[error("Image too large: block {block} lies beyond the 32-bit address space")]
    ImageTooLarge {
        /// Zero-based index of the first block that does not fit.
        block: usize,
    },

    /// I/O error while reading a firmware file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error on an open serial link (write failure, disconnect).
    #[error("Serial I/O error: {0}")]
    PortIo(#[source] io::Error),

    /// Serial port could not be opened or configured.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device did not follow the download protocol.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Caller-supplied input is missing or invalid.
    #[error("Invalid input: {0}")]
    UserInput(#[from] UserInputError),

    /// The download was cancelled between two block transfers.
    #[error("Download cancelled")]
    Cancelled,

    /// Another download already owns the serial port.
    #[error("A download is already in progress")]
    Busy,

    /// The download worker thread panicked.
    #[error("Download worker terminated unexpectedly")]
    WorkerPanicked,
}

/// Protocol failures, one per phase of the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No `CC DD` reply to the `5A A5` handshake.
    #[error("Handshake timeout")]
    HandshakeTimeout,

    /// No `CC DD` reply to the `5A 01` mode entry command.
    #[error("Mode entry failed")]
    ModeEntryFailed,

    /// A data block was not acknowledged.
    #[error("Block {index} address {address:#x} checksum error")]
    BlockAckFailed {
        /// Zero-based block index.
        index: usize,
        /// Absolute target address of the block.
        address: u32,
    },
}

/// Errors caused by missing or malformed user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserInputError {
    /// No serial port was chosen.
    #[error("No serial port selected")]
    NoPortSelected,

    /// The base address is not a hexadecimal 32-bit value.
    #[error("Invalid hexadecimal start address: '{0}'")]
    InvalidBaseAddress(String),

    /// No firmware image has been loaded.
    #[error("No firmware file loaded")]
    NoImageLoaded,

    /// The loaded firmware image contains no data.
    #[error("Firmware image is empty")]
    EmptyImage,

    /// The baud rate is not in the supported set.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Base address plus block offset does not fit in 32 bits.
    #[error("Block {index} at offset {offset:#x} overflows the 32-bit address space")]
    AddressOverflow {
        /// Zero-based block index.
        index: usize,
        /// Block offset relative to the base address.
        offset: u32,
    },
}

impl Error {
    /// Returns true if this error was caused by the device (protocol or serial I/O)
    /// rather than by the caller's input.
    pub fn is_device_error(&self) -> bool {
        match self {
            Self::Protocol(_) | Self::PortIo(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
