//! Intel HEX images.
//!
//! Only two record types matter to the bootloader:
//!
//! - `00` data: `address = segment + offset`
//! - `04` extended linear address: `segment = upper16 << 16`
//!
//! Every other record type is skipped, and record checksums are not verified.
//!
//! ## Block Splitting
//!
//! Records are packed into blocks in file order. A data record starts a new
//! block when there is no current block, when its address is at least
//! [`BLOCK_SIZE`] past the current block's address, or when the current block
//! is full. Otherwise its bytes go to the next free offset of the current
//! block, even if the record's address leaves a smaller gap or points backwards.
//! If a block fills up in the middle of a record, the remaining bytes continue
//! in a new block addressed at the first byte that did not fit.
//!
//! Blocks are neither sorted nor merged. Files with out-of-order or
//! overlapping records therefore produce blocks whose addresses do not match
//! their contents exactly; target bootloaders in the field expect this layout.
//!
//! Records whose fields are not valid hex digits, or whose data field is
//! shorter than the declared length, are rejected with
//! [`Error::InvalidHex`].

use crate::error::{Error, Result};
use crate::image::{BLOCK_SIZE, Block, FirmwareImage, ImageOrigin};
use crate::protocol::crc::Crc32;
use log::{debug, trace};
use std::ops::Range;

/// Data record type.
pub const RECORD_DATA: &str = "00";

/// Extended linear address record type.
pub const RECORD_EXTENDED_LINEAR_ADDRESS: &str = "04";

#[allow(clippy::cast_possible_wrap)]
const BLOCK_SPAN: i64 = BLOCK_SIZE as i64;

/// Parse Intel HEX text into a firmware image.
pub fn parse(text: &str) -> Result<FirmwareImage> {
    let mut splitter = BlockSplitter::default();
    let mut crc = Crc32::new();
    let mut segment: u32 = 0;
    let mut total_bytes: u64 = 0;
    let mut min_address: Option<u32> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end();
        if !line.starts_with(':') {
            continue;
        }

        match line.get(7..9) {
            Some(RECORD_EXTENDED_LINEAR_ADDRESS) => {
                segment = u32::from(hex_u16(line, 9..13, line_no)?) << 16;
                debug!("Line {line_no}: segment 0x{segment:08X}");
            },
            Some(RECORD_DATA) => {
                let len = hex_u8(line, 1..3, line_no)?;
                let offset = hex_u16(line, 3..7, line_no)?;
                let address = segment + u32::from(offset);
                let data = hex_bytes(line, 9, usize::from(len), line_no)?;

                min_address = Some(min_address.map_or(address, |min| min.min(address)));
                total_bytes += u64::from(len);

                splitter.begin_record(address);
                for (k, &byte) in data.iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation)] // k < 256
                    splitter.push(address.wrapping_add(k as u32), byte);
                    crc.update_byte(byte);
                }
            },
            other => {
                trace!("Line {line_no}: skipping record type {other:?}");
            },
        }
    }

    Ok(FirmwareImage {
        blocks: splitter.finish(),
        total_bytes,
        checksum: crc.value(),
        min_address,
        origin: ImageOrigin::Hex,
    })
}

/// Packs record bytes into blocks following the splitting rules above.
#[derive(Default)]
struct BlockSplitter {
    sealed: Vec<Block>,
    current: Option<Block>,
    fill: usize,
}

impl BlockSplitter {
    fn begin_record(&mut self, address: u32) {
        let needs_new = match &self.current {
            None => true,
            Some(block) => {
                i64::from(address) - i64::from(block.address()) >= BLOCK_SPAN
                    || self.fill >= BLOCK_SIZE
            },
        };
        if needs_new {
            self.open(address);
        }
    }

    fn push(&mut self, address: u32, byte: u8) {
        if self.current.is_none() || self.fill >= BLOCK_SIZE {
            self.open(address);
        }
        if let Some(block) = self.current.as_mut() {
            block.data_mut()[self.fill] = byte;
            self.fill += 1;
        }
    }

    fn open(&mut self, address: u32) {
        if let Some(block) = self.current.take() {
            self.sealed.push(block);
        }
        self.current = Some(Block::erased(address));
        self.fill = 0;
    }

    fn finish(mut self) -> Vec<Block> {
        if let Some(block) = self.current.take() {
            self.sealed.push(block);
        }
        self.sealed
    }
}

fn field<'a>(line: &'a str, range: Range<usize>, line_no: usize) -> Result<&'a str> {
    line.get(range.clone()).ok_or_else(|| Error::InvalidHex {
        line: line_no,
        reason: format!("record too short for field at {}..{}", range.start, range.end),
    })
}

fn hex_u8(line: &str, range: Range<usize>, line_no: usize) -> Result<u8> {
    let s = field(line, range, line_no)?;
    u8::from_str_radix(s, 16).map_err(|_| invalid_digits(s, line_no))
}

fn hex_u16(line: &str, range: Range<usize>, line_no: usize) -> Result<u16> {
    let s = field(line, range, line_no)?;
    u16::from_str_radix(s, 16).map_err(|_| invalid_digits(s, line_no))
}

fn hex_bytes(line: &str, start: usize, len: usize, line_no: usize) -> Result<Vec<u8>> {
    let s = field(line, start..start + len * 2, line_no)?;
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .ok_or_else(|| invalid_digits(&String::from_utf8_lossy(pair), line_no))
        })
        .collect()
}

fn invalid_digits(s: &str, line_no: usize) -> Error {
    Error::InvalidHex {
        line: line_no,
        reason: format!("'{s}' is not a hex number"),
    }
}
