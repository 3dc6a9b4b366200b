//! Raw binary images.

use crate::error::{Error, Result};
use crate::image::{BLOCK_SIZE, Block, FirmwareImage, ImageOrigin};
use crate::protocol::crc::Crc32;

/// Offset of block `index`, or `ImageTooLarge` past the 32-bit address space.
fn block_offset(index: usize) -> Result<u32> {
    index
        .checked_mul(BLOCK_SIZE)
        .and_then(|offset| u32::try_from(offset).ok())
        .ok_or(Error::ImageTooLarge { block: index })
}

/// Split raw bytes into padded blocks at offsets `0, 2048, 4096, ...`.
///
/// The checksum covers the real bytes of each chunk, never the padding.
pub fn parse(data: &[u8]) -> Result<FirmwareImage> {
    let mut crc = Crc32::new();
    let mut blocks = Vec::with_capacity(data.len().div_ceil(BLOCK_SIZE));

    for (i, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
        blocks.push(Block::from_slice(block_offset(i)?, chunk));
        crc.update(chunk);
    }

    Ok(FirmwareImage {
        blocks,
        total_bytes: data.len() as u64,
        checksum: crc.value(),
        min_address: None,
        origin: ImageOrigin::Bin,
    })
}
