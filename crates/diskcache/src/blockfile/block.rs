//! Block files (`data_N`) and external files (`f_XXXXXX`).
//!
//! Every read opens its own read-only handle, so any number of workers can
//! read the same block file at once without sharing a cursor.

use crate::addr::EntryAddress;
use crate::error::{ErrorKind, Result};
use crate::models::RawRecord;
use crate::PayloadReader;
use byteorder::{LittleEndian, ReadBytesExt};
use exn::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub const BLOCK_MAGIC: u32 = 0xC104_CAC3;
pub const BLOCK_HEADER_SIZE: u64 = 8192;
/// Only the leading fields of the header matter; the allocation bitmap after
/// them is never consulted.
const BLOCK_HEADER_PREFIX: usize = 24;
const EXTERNAL_BUFFER_SIZE: usize = 64 * 1024;

/// The fields of a block file header needed to locate blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFileHeader {
    pub version: u32,
    pub this_file: i16,
    pub next_file: i16,
    pub entry_size: u32,
    pub num_entries: u32,
    pub max_entries: u32,
}

impl BlockFileHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let truncated = || ErrorKind::format("truncated block file header");
        let magic = cursor.read_u32::<LittleEndian>().or_raise(truncated)?;
        if magic != BLOCK_MAGIC {
            exn::bail!(ErrorKind::format(format!("bad block file magic {magic:#010x}")));
        }
        let header = Self {
            version: cursor.read_u32::<LittleEndian>().or_raise(truncated)?,
            this_file: cursor.read_i16::<LittleEndian>().or_raise(truncated)?,
            next_file: cursor.read_i16::<LittleEndian>().or_raise(truncated)?,
            entry_size: cursor.read_u32::<LittleEndian>().or_raise(truncated)?,
            num_entries: cursor.read_u32::<LittleEndian>().or_raise(truncated)?,
            max_entries: cursor.read_u32::<LittleEndian>().or_raise(truncated)?,
        };
        if header.entry_size == 0 {
            exn::bail!(ErrorKind::format("block file declares zero-sized blocks"));
        }
        Ok(header)
    }
}

/// All block files of one cache, with their headers loaded up front.
#[derive(Debug)]
pub struct BlockFiles {
    root: PathBuf,
    /// A block file with an unreadable header only fails the entries that
    /// point into it.
    headers: HashMap<u8, std::result::Result<BlockFileHeader, String>>,
}

impl BlockFiles {
    /// Scan `root` for `data_N` files and load their headers.
    #[instrument(level = "debug", skip_all, fields(root = %root.display(), block_files))]
    pub fn open(root: &Path) -> Result<Self> {
        let mut headers = HashMap::new();
        let entries = std::fs::read_dir(root).or_raise(|| ErrorKind::Io(root.to_path_buf()))?;
        for entry in entries {
            let entry = entry.or_raise(|| ErrorKind::Io(root.to_path_buf()))?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix("data_")).and_then(|n| n.parse::<u8>().ok())
            else {
                continue;
            };
            let header = read_exact_at(&entry.path(), 0, BLOCK_HEADER_PREFIX)
                .and_then(|bytes| BlockFileHeader::parse(&bytes))
                .map_err(|err| (*err).to_string());
            if let Err(reason) = &header {
                tracing::warn!(file = %entry.path().display(), %reason, "unusable block file");
            }
            headers.insert(id, header);
        }
        tracing::Span::current().record("block_files", headers.len());
        Ok(Self { root: root.to_path_buf(), headers })
    }

    #[must_use]
    pub fn header(&self, file: u8) -> Option<&BlockFileHeader> {
        self.headers.get(&file).and_then(|h| h.as_ref().ok())
    }

    /// Read up to `size` bytes stored at `address`.
    ///
    /// For inline addresses the whole block range is validated and read,
    /// then cut down to `size`.
    pub fn read(&self, address: &EntryAddress, size: u64) -> Result<RawRecord> {
        match *address {
            EntryAddress::Inline { .. } => {
                let mut bytes = self.read_blocks(address)?.into_inner();
                let capacity = bytes.len() as u64;
                if size > capacity {
                    exn::bail!(ErrorKind::format(format!(
                        "{size} bytes declared but {address} holds {capacity}"
                    )));
                }
                bytes.truncate(size as usize);
                Ok(RawRecord(bytes))
            },
            EntryAddress::External { .. } => {
                let mut bytes = Vec::new();
                self.stream(address, size)?
                    .read_to_end(&mut bytes)
                    .or_raise(|| ErrorKind::Io(self.root.join(address.file_name())))?;
                Ok(RawRecord(bytes))
            },
        }
    }

    /// Read every block of an inline address.
    #[instrument(level = "trace", skip(self), fields(%address))]
    pub fn read_blocks(&self, address: &EntryAddress) -> Result<RawRecord> {
        let EntryAddress::Inline { file, block_size, start, count } = *address else {
            exn::bail!(ErrorKind::format(format!("{address} is not a block address")));
        };
        let header = match self.headers.get(&file) {
            Some(Ok(header)) => header,
            Some(Err(reason)) => exn::bail!(ErrorKind::corruption(format!("data_{file}: {reason}"))),
            None => exn::bail!(ErrorKind::corruption(format!("data_{file} does not exist"))),
        };
        if header.entry_size != block_size {
            exn::bail!(ErrorKind::corruption(format!(
                "data_{file} holds {}-byte blocks but {address} expects {block_size}",
                header.entry_size
            )));
        }
        if u32::from(start) + u32::from(count) > header.max_entries {
            exn::bail!(ErrorKind::corruption(format!(
                "{address} is past the {} blocks of data_{file}",
                header.max_entries
            )));
        }
        let offset = BLOCK_HEADER_SIZE + u64::from(start) * u64::from(block_size);
        let len = block_size as usize * usize::from(count);
        Ok(RawRecord(read_exact_at(&self.root.join(address.file_name()), offset, len)?))
    }

    /// Open a reader over `size` bytes stored at `address`.
    ///
    /// External files are streamed through a fixed-size buffer; they are
    /// never loaded whole.
    pub fn stream<'a>(&self, address: &EntryAddress, size: u64) -> Result<PayloadReader<'a>> {
        match address {
            EntryAddress::Inline { .. } => Ok(Box::new(Cursor::new(self.read(address, size)?.into_inner()))),
            EntryAddress::External { .. } => {
                let path = self.root.join(address.file_name());
                let file = File::open(&path).or_raise(|| ErrorKind::Io(path.clone()))?;
                let available = file.metadata().or_raise(|| ErrorKind::Io(path.clone()))?.len();
                if available < size {
                    exn::bail!(ErrorKind::format(format!(
                        "{size} bytes declared but {address} holds {available}"
                    )));
                }
                Ok(Box::new(BufReader::with_capacity(EXTERNAL_BUFFER_SIZE, file).take(size)))
            },
        }
    }
}

fn read_exact_at(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    file.seek(SeekFrom::Start(offset)).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    let mut buffer = vec![0; len];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => exn::bail!(ErrorKind::corruption(format!(
            "{} ends before byte {}",
            path.display(),
            offset + len as u64
        ))),
        Err(err) => Err(err).or_raise(|| ErrorKind::Io(path.to_path_buf())),
    }
}
