//! Firmware image loading.
//!
//! A firmware file (Intel HEX or raw binary) is split into fixed-size,
//! address-tagged [`Block`]s, the unit the bootloader accepts. Unused bytes
//! at the end of a block are padded with `0xFF`.
//!
//! Block addresses mean different things per origin:
//!
//! - [`ImageOrigin::Bin`]: zero-based offsets (`0, 2048, 4096, ...`), added to
//!   a caller-supplied base address at download time.
//! - [`ImageOrigin::Hex`]: absolute target addresses taken from the file.

pub mod bin;
pub mod hex;

use crate::error::{Error, Result};
use log::info;
use std::path::Path;

/// Size of one transfer block in bytes.
pub const BLOCK_SIZE: usize = 2048;

/// Value used for unused block bytes (erased flash).
pub const PAD_BYTE: u8 = 0xFF;

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ImageOrigin {
    /// Intel HEX file, absolute addresses.
    Hex,
    /// Raw binary file, relative addresses.
    Bin,
}

impl ImageOrigin {
    /// Detect the origin from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        if ext.eq_ignore_ascii_case("hex") {
            Ok(Self::Hex)
        } else if ext.eq_ignore_ascii_case("bin") {
            Ok(Self::Bin)
        } else {
            Err(Error::Format(format!(
                "'{}' is not a .bin or .hex file",
                path.display()
            )))
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hex => "HEX",
            Self::Bin => "BIN",
        }
    }
}

/// One address-tagged chunk of firmware, always [`BLOCK_SIZE`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    address: u32,
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Create a block filled with [`PAD_BYTE`].
    pub fn erased(address: u32) -> Self {
        Self {
            address,
            data: Box::new([PAD_BYTE; BLOCK_SIZE]),
        }
    }

    /// Create a block from up to [`BLOCK_SIZE`] bytes, padding the rest.
    pub fn from_slice(address: u32, bytes: &[u8]) -> Self {
        let mut block = Self::erased(address);
        let len = bytes.len().min(BLOCK_SIZE);
        block.data[..len].copy_from_slice(&bytes[..len]);
        block
    }

    /// Block address (relative for BIN images, absolute for HEX images).
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Block contents, including padding.
    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("address", &format_args!("{:#010x}", self.address))
            .finish_non_exhaustive()
    }
}

/// A parsed firmware image, ready to be downloaded.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Blocks in encounter order.
    pub blocks: Vec<Block>,
    /// Number of real (non-padding) bytes in the file.
    pub total_bytes: u64,
    /// Checksum over the real bytes, see [`crate::protocol::crc`].
    pub checksum: u32,
    /// Smallest absolute data address (HEX images with data only).
    pub min_address: Option<u32>,
    /// File format the image came from.
    pub origin: ImageOrigin,
}

impl FirmwareImage {
    /// Load an image from a `.bin` or `.hex` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let origin = ImageOrigin::from_path(path)?;

        let image = match origin {
            ImageOrigin::Hex => {
                let text = std::fs::read_to_string(path)?;
                hex::parse(&text)?
            },
            ImageOrigin::Bin => {
                let data = std::fs::read(path)?;
                bin::parse(&data)?
            },
        };

        info!(
            "Loaded {} blocks, total {} bytes, CRC: {}",
            image.block_count(),
            image.total_bytes,
            image.checksum_hex()
        );
        Ok(image)
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// True if the image holds no data.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Base address to offer the user after loading.
    ///
    /// Only HEX images carry absolute addresses; BIN images return `None`.
    pub fn suggested_base_address(&self) -> Option<u32> {
        match self.origin {
            ImageOrigin::Hex => self.min_address,
            ImageOrigin::Bin => None,
        }
    }

    /// Checksum formatted as `0x%08X`.
    pub fn checksum_hex(&self) -> String {
        format!("0x{:08X}", self.checksum)
    }

    /// Resolve the address a block is written to on the target.
    pub fn target_address(&self, index: usize, base_address: u32) -> Result<u32> {
        let block = &self.blocks[index];
        match self.origin {
            ImageOrigin::Hex => Ok(block.address),
            ImageOrigin::Bin => base_address
                .checked_add(block.address)
                .ok_or_else(|| {
                    crate::error::UserInputError::AddressOverflow {
                        index,
                        offset: block.address,
                    }
                    .into()
                }),
        }
    }
}

/// Load a firmware image from disk.
pub fn load<P: AsRef<Path>>(path: P) -> Result<FirmwareImage> {
    FirmwareImage::from_file(path)
}
