//! Entry records (`EntryStore`).
//!
//! A record is one to four 256-byte blocks in a block file. The first 96
//! bytes are fixed fields; the key follows inline unless it is too long, in
//! which case it lives at its own address.

use crate::addr::EntryAddress;
use crate::error::{ErrorKind, Result};
use crate::hash::persistent_hash;
use crate::models::StreamRef;
use byteorder::{ByteOrder, LittleEndian};

pub const ENTRY_BLOCK_SIZE: usize = 256;
pub const KEY_OFFSET: usize = 96;
/// `self_hash` covers every byte before it.
const SELF_HASH_OFFSET: usize = 92;
pub const STREAM_COUNT: usize = 4;

pub const FLAG_PARENT: u32 = 1;
pub const FLAG_CHILD: u32 = 2;

/// Stream indices shared by every HTTP cache entry.
pub const STREAM_RESPONSE_INFO: usize = 0;
pub const STREAM_BODY: usize = 1;
pub const STREAM_SPARSE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Normal,
    Evicted,
    Doomed,
    Unknown(i32),
}

impl From<i32> for EntryState {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Evicted,
            2 => Self::Doomed,
            other => Self::Unknown(other),
        }
    }
}

/// The fixed fields of an entry record.
///
/// Parsing does not verify anything: the index walk needs `next` and `state`
/// even out of a record that later fails [`verify`](Self::verify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStore {
    pub hash: u32,
    pub next: u32,
    pub rankings: u32,
    pub reuse_count: i32,
    pub refetch_count: i32,
    pub state: EntryState,
    pub creation_time: u64,
    pub key_len: i32,
    pub long_key: u32,
    pub data_size: [i32; STREAM_COUNT],
    pub data_addr: [u32; STREAM_COUNT],
    pub flags: u32,
    pub self_hash: u32,
}

impl EntryStore {
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < ENTRY_BLOCK_SIZE {
            exn::bail!(ErrorKind::format(format!("entry record is {} bytes", record.len())));
        }
        let u32_at = |offset: usize| LittleEndian::read_u32(&record[offset..]);
        let i32_at = |offset: usize| LittleEndian::read_i32(&record[offset..]);
        Ok(Self {
            hash: u32_at(0),
            next: u32_at(4),
            rankings: u32_at(8),
            reuse_count: i32_at(12),
            refetch_count: i32_at(16),
            state: EntryState::from(i32_at(20)),
            creation_time: LittleEndian::read_u64(&record[24..]),
            key_len: i32_at(32),
            long_key: u32_at(36),
            data_size: std::array::from_fn(|i| i32_at(40 + i * 4)),
            data_addr: std::array::from_fn(|i| u32_at(56 + i * 4)),
            flags: u32_at(72),
            self_hash: u32_at(SELF_HASH_OFFSET),
        })
    }

    /// Check the record checksum, when one was written.
    pub fn verify(&self, record: &[u8]) -> Result<()> {
        if self.self_hash == 0 {
            return Ok(());
        }
        let actual = persistent_hash(&record[..SELF_HASH_OFFSET]);
        if actual != self.self_hash {
            exn::bail!(ErrorKind::corruption(format!(
                "entry checksum {actual:08x} does not match stored {:08x}",
                self.self_hash
            )));
        }
        Ok(())
    }

    /// Where the key is stored, with its length.
    pub fn key_location(&self, record: &[u8]) -> Result<KeyLocation> {
        let Ok(len) = usize::try_from(self.key_len) else {
            exn::bail!(ErrorKind::format(format!("negative key length {}", self.key_len)));
        };
        match EntryAddress::from_raw(self.long_key)? {
            Some(address) => Ok(KeyLocation::External { address, len }),
            None => {
                if KEY_OFFSET + len > record.len() {
                    exn::bail!(ErrorKind::format(format!(
                        "inline key of {len} bytes does not fit a {} byte record",
                        record.len()
                    )));
                }
                Ok(KeyLocation::Inline(KEY_OFFSET..KEY_OFFSET + len))
            },
        }
    }

    /// Check a key against the stored hash.
    pub fn verify_key(&self, key: &[u8]) -> Result<()> {
        let actual = persistent_hash(key);
        if actual != self.hash {
            exn::bail!(ErrorKind::corruption(format!("key hash {actual:08x} does not match stored {:08x}", self.hash)));
        }
        Ok(())
    }

    /// Describe stream `index`, `None` if it is empty.
    pub fn stream(&self, index: usize) -> Result<Option<StreamRef>> {
        let Ok(size) = u64::try_from(self.data_size[index]) else {
            exn::bail!(ErrorKind::format(format!("stream {index} has negative size {}", self.data_size[index])));
        };
        match (size, EntryAddress::from_raw(self.data_addr[index])?) {
            (0, _) => Ok(None),
            (size, Some(address)) => {
                if let Some(capacity) = address.capacity()
                    && size > capacity
                {
                    exn::bail!(ErrorKind::format(format!(
                        "stream {index} declares {size} bytes but {address} holds {capacity}"
                    )));
                }
                Ok(Some(StreamRef { address, size }))
            },
            (size, None) => {
                exn::bail!(ErrorKind::corruption(format!("stream {index} declares {size} bytes but has no storage")))
            },
        }
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.flags & FLAG_PARENT != 0
    }

    #[must_use]
    pub fn is_child(&self) -> bool {
        self.flags & FLAG_CHILD != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLocation {
    Inline(std::ops::Range<usize>),
    External { address: EntryAddress, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::RecordBuilder;

    #[test]
    fn test_parse_and_verify() {
        let record = RecordBuilder::new("https://example.com/a.png").body_stream(0xA002_0001, 10).build();
        let store = EntryStore::parse(&record).unwrap();
        assert_eq!(store.state, EntryState::Normal);
        store.verify(&record).unwrap();
        let KeyLocation::Inline(range) = store.key_location(&record).unwrap() else {
            panic!("expected an inline key");
        };
        store.verify_key(&record[range]).unwrap();
        let body = store.stream(STREAM_BODY).unwrap().unwrap();
        assert_eq!(body.size, 10);
        assert_eq!(store.stream(STREAM_RESPONSE_INFO).unwrap(), None);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut record = RecordBuilder::new("https://example.com/a.png").build();
        record[12] ^= 0xFF;
        let store = EntryStore::parse(&record).unwrap();
        let err = store.verify(&record).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Corruption(_)));
    }

    #[test]
    fn test_zero_checksum_is_not_verified() {
        let mut record = RecordBuilder::new("https://example.com/a.png").build();
        record[SELF_HASH_OFFSET..SELF_HASH_OFFSET + 4].fill(0);
        record[12] ^= 0xFF;
        EntryStore::parse(&record).unwrap().verify(&record).unwrap();
    }

    #[test]
    fn test_key_longer_than_record() {
        let mut record = RecordBuilder::new("https://example.com/a.png").build();
        record[32..36].copy_from_slice(&1000i32.to_le_bytes());
        let err = EntryStore::parse(&record).unwrap().key_location(&record).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn test_stream_larger_than_storage() {
        // One 256-byte block cannot hold 300 bytes.
        let record = RecordBuilder::new("https://example.com/a.png").body_stream(0xA002_0001, 300).build();
        let err = EntryStore::parse(&record).unwrap().stream(STREAM_BODY).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn test_states() {
        assert_eq!(EntryState::from(1), EntryState::Evicted);
        assert_eq!(EntryState::from(2), EntryState::Doomed);
        assert_eq!(EntryState::from(9), EntryState::Unknown(9));
    }
}
