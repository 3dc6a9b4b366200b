//! IAP bootloader serial protocol.
//!
//! Half-duplex command/response over a byte stream. Every host frame except
//! finalize must be answered with the two-byte acknowledgement `CC DD`.
//!
//! | Phase      | Host -> Device                            | Device -> Host |
//! |------------|-------------------------------------------|----------------|
//! | Handshake  | `5A A5`                                   | `CC DD`        |
//! | Mode entry | `5A 01`                                   | `CC DD`        |
//! | Data block | `31` + addr (BE u32) + 2048 data + sum8   | `CC DD`        |
//! | Finalize   | `5A 02`                                   | (ignored)      |
//!
//! ## Block Packet Format
//!
//! ```text
//! +------+-----------+----------------+----------+
//! | Tag  |  Address  |     Payload    | Checksum |
//! +------+-----------+----------------+----------+
//! |  1   | 4 (BE)    |     2048       |    1     |
//! +------+-----------+----------------+----------+
//! | 0x31 | target    | block data     | sum8     |
//! +------+-----------+----------------+----------+
//! ```
//!
//! The checksum is the low byte of the sum of the address and payload bytes.

use crate::image::BLOCK_SIZE;
use byteorder::{BigEndian, WriteBytesExt};

/// Handshake request.
pub const HANDSHAKE: [u8; 2] = [0x5A, 0xA5];

/// Enter download mode.
pub const MODE_ENTRY: [u8; 2] = [0x5A, 0x01];

/// Finish the download.
pub const FINALIZE: [u8; 2] = [0x5A, 0x02];

/// Acknowledgement expected from the device.
pub const ACK: [u8; 2] = [0xCC, 0xDD];

/// First byte of every data block packet.
pub const BLOCK_TAG: u8 = 0x31;

/// Total length of a data block packet.
pub const BLOCK_PACKET_LEN: usize = 1 + 4 + BLOCK_SIZE + 1;

/// Host commands that carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `5A A5`.
    Handshake,
    /// `5A 01`.
    ModeEntry,
    /// `5A 02`.
    Finalize,
}

impl Command {
    /// Raw bytes sent on the wire.
    pub fn bytes(self) -> [u8; 2] {
        match self {
            Self::Handshake => HANDSHAKE,
            Self::ModeEntry => MODE_ENTRY,
            Self::Finalize => FINALIZE,
        }
    }
}

/// Check whether a response is the `CC DD` acknowledgement.
pub fn is_ack(response: &[u8]) -> bool {
    response == ACK
}

/// Additive 8-bit checksum.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a data block packet for `address`.
///
/// The packet is always [`BLOCK_PACKET_LEN`] bytes long.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn build_block_packet(address: u32, data: &[u8; BLOCK_SIZE]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOCK_PACKET_LEN);
    buf.push(BLOCK_TAG);
    buf.write_u32::<BigEndian>(address).unwrap();
    buf.extend_from_slice(data);

    let checksum = sum8(&buf[1..]);
    buf.push(checksum);
    buf
}
