//! Protocol implementations.

pub mod crc;
pub mod iap;

// Re-export common types
pub use crc::{Crc32, crc32_accumulate};
pub use iap::{BLOCK_PACKET_LEN, Command, build_block_packet, is_ack};
