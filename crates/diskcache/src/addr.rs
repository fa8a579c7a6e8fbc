//! Cache addresses.
//!
//! Chromium packs the location of every record and stream into a tagged
//! 32-bit value. The raw value is decoded exactly once, here, into an
//! [`EntryAddress`]; nothing downstream inspects the bits again.

use crate::error::{ErrorKind, Result};
use derive_more::Display;

const INITIALIZED: u32 = 0x8000_0000;
const FILE_TYPE_MASK: u32 = 0x7000_0000;
const FILE_TYPE_OFFSET: u32 = 28;
const RESERVED_MASK: u32 = 0x0C00_0000;
const NUM_BLOCKS_MASK: u32 = 0x0300_0000;
const NUM_BLOCKS_OFFSET: u32 = 24;
const FILE_SELECTOR_MASK: u32 = 0x00FF_0000;
const FILE_SELECTOR_OFFSET: u32 = 16;
const START_BLOCK_MASK: u32 = 0x0000_FFFF;
const FILE_NAME_MASK: u32 = 0x0FFF_FFFF;

const EXTERNAL: u32 = 0;
const EVICTED: u32 = 7;

/// Maximum number of contiguous blocks a single address can span.
pub const MAX_BLOCKS: u8 = 4;

/// Where a record or stream lives.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryAddress {
    /// `count` contiguous blocks of `block_size` bytes in block file `data_{file}`.
    #[display("data_{file}[{start}+{count}]")]
    Inline { file: u8, block_size: u32, start: u16, count: u8 },
    /// A standalone file `f_{file:06x}`.
    #[display("f_{file:06x}")]
    External { file: u32 },
}

impl EntryAddress {
    /// Decode a raw address.
    ///
    /// Uninitialized addresses and the "evicted" file type both mean there is
    /// nothing stored, and decode to `None`.
    pub fn from_raw(raw: u32) -> Result<Option<Self>> {
        if raw & INITIALIZED == 0 {
            return Ok(None);
        }
        let file_type = (raw & FILE_TYPE_MASK) >> FILE_TYPE_OFFSET;
        let block_size = match file_type {
            EXTERNAL => return Ok(Some(Self::External { file: raw & FILE_NAME_MASK })),
            EVICTED => return Ok(None),
            1 => 36,
            2 => 256,
            3 => 1024,
            4 => 4096,
            5 => 8,
            // 6, the only value left in three bits.
            _ => 104,
        };
        if raw & RESERVED_MASK != 0 {
            exn::bail!(ErrorKind::format(format!("reserved bits set in cache address {raw:#010x}")));
        }
        Ok(Some(Self::Inline {
            file: ((raw & FILE_SELECTOR_MASK) >> FILE_SELECTOR_OFFSET) as u8,
            block_size,
            start: (raw & START_BLOCK_MASK) as u16,
            count: ((raw & NUM_BLOCKS_MASK) >> NUM_BLOCKS_OFFSET) as u8 + 1,
        }))
    }

    /// Encode back into the on-disk representation.
    #[must_use]
    pub fn to_raw(&self) -> u32 {
        match *self {
            Self::External { file } => INITIALIZED | (file & FILE_NAME_MASK),
            Self::Inline { file, block_size, start, count } => {
                let file_type = match block_size {
                    36 => 1,
                    256 => 2,
                    1024 => 3,
                    4096 => 4,
                    8 => 5,
                    _ => 6,
                };
                INITIALIZED
                    | (file_type << FILE_TYPE_OFFSET)
                    | ((u32::from(count.saturating_sub(1)) << NUM_BLOCKS_OFFSET) & NUM_BLOCKS_MASK)
                    | (u32::from(file) << FILE_SELECTOR_OFFSET)
                    | u32::from(start)
            },
        }
    }

    /// Name of the file holding this address, relative to the cache root.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::Inline { file, .. } => format!("data_{file}"),
            Self::External { file } => format!("f_{file:06x}"),
        }
    }

    /// Number of bytes the address can hold, if it is bounded.
    #[must_use]
    pub fn capacity(&self) -> Option<u64> {
        match self {
            Self::Inline { block_size, count, .. } => Some(u64::from(*block_size) * u64::from(*count)),
            Self::External { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x0000_0000)]
    #[case(0x7FFF_FFFF)]
    #[case(0xF000_0001)]
    fn test_absent(#[case] raw: u32) {
        assert_eq!(EntryAddress::from_raw(raw).unwrap(), None);
    }

    #[rstest]
    #[case(0xA001_0003, EntryAddress::Inline { file: 1, block_size: 256, start: 3, count: 1 })]
    #[case(0xA301_0010, EntryAddress::Inline { file: 1, block_size: 256, start: 16, count: 4 })]
    #[case(0xB102_0000, EntryAddress::Inline { file: 2, block_size: 1024, start: 0, count: 2 })]
    #[case(0xC004_FFFF, EntryAddress::Inline { file: 4, block_size: 4096, start: 65535, count: 1 })]
    #[case(0x8000_002A, EntryAddress::External { file: 42 })]
    fn test_decode(#[case] raw: u32, #[case] expected: EntryAddress) {
        let decoded = EntryAddress::from_raw(raw).unwrap().unwrap();
        assert_eq!(decoded, expected);
        assert_eq!(decoded.to_raw(), raw);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let err = EntryAddress::from_raw(0xA401_0000).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[rstest]
    #[case(EntryAddress::Inline { file: 3, block_size: 4096, start: 0, count: 1 }, "data_3")]
    #[case(EntryAddress::External { file: 0x1b }, "f_00001b")]
    fn test_file_name(#[case] address: EntryAddress, #[case] expected: &str) {
        assert_eq!(address.file_name(), expected);
    }
}
