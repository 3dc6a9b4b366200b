//! Table-driven CRC32 used for image checksums.
//!
//! This is the reflected `0xEDB88320` polynomial, but **without** the usual
//! initial and final complement of CRC-32/ISO-HDLC. The bootloader compares
//! against exactly this value, so the seed is 0 and the result is returned
//! as-is.
//!
//! The running value can be threaded through any number of calls; feeding
//! the bytes in pieces gives the same result as one call over the whole
//! sequence.

/// Reflected CRC32 polynomial.
pub const CRC32_POLY: u32 = 0xEDB8_8320;

/// Precomputed lookup table, built at compile time.
pub static CRC32_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a checksum from `crc` over `data`.
///
/// Pass `0` to start a new checksum.
pub fn crc32_accumulate(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

/// Stateful accumulator over [`crc32_accumulate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32 {
    value: u32,
}

impl Crc32 {
    /// Start a new checksum (seed 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.value = crc32_accumulate(self.value, data);
    }

    /// Feed a single byte.
    pub fn update_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    /// Current checksum value.
    pub fn value(&self) -> u32 {
        self.value
    }
}
