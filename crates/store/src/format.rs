//! Store binary format constants and header read/write helpers.
//!
//! ## Header (48 bytes) - magic `DDB1` (`0x4444_4231`)
//!
//! ```text
//! [magic: u32][version: u16][flags: u16][key_count: u64][value_count: u64]
//! [index_len: u64][data_len: u64][body_crc32: u32][reserved: u32]
//! ```
//!
//! The body that follows is `index_len` bytes of perfect-hash index,
//! `(key_count + 1) * 8` bytes of offset table, then `data_len` bytes of
//! per-slot entries. `body_crc32` covers the whole body.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

use crate::error::StoreError;

/// Magic number identifying a serialized store (ASCII "DDB1").
pub const STORE_MAGIC: u32 = 0x4444_4231;

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_BYTES: usize = 4 + 2 + 2 + 8 + 8 + 8 + 8 + 4 + 4;

/// Width of one offset table entry.
pub const OFFSET_BYTES: usize = 8;

/// Header flag: identical values under one key were collapsed.
pub const FLAG_DEDUP_VALUES: u16 = 1 << 0;

/// Header flag: values within a key are in insertion order.
pub const FLAG_INSERTION_ORDER: u16 = 1 << 1;

const KNOWN_FLAGS: u16 = FLAG_DEDUP_VALUES | FLAG_INSERTION_ORDER;

/// Build-time properties recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// Values under each key are distinct.
    pub dedup_values: bool,
    /// Values under each key are in the order they were added.
    pub insertion_order: bool,
}

impl Flags {
    #[must_use]
    pub fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.dedup_values {
            bits |= FLAG_DEDUP_VALUES;
        }
        if self.insertion_order {
            bits |= FLAG_INSERTION_ORDER;
        }
        bits
    }

    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        Self {
            dedup_values: bits & FLAG_DEDUP_VALUES != 0,
            insertion_order: bits & FLAG_INSERTION_ORDER != 0,
        }
    }
}

/// Parsed store header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub flags: Flags,
    pub key_count: u64,
    pub value_count: u64,
    pub index_len: u64,
    pub data_len: u64,
    pub body_crc32: u32,
}

impl Header {
    /// Byte offset of the perfect-hash index section.
    #[must_use]
    pub fn index_start(&self) -> usize {
        HEADER_BYTES
    }

    /// Byte offset of the offset table.
    #[must_use]
    pub fn offsets_start(&self) -> usize {
        HEADER_BYTES + self.index_len as usize
    }

    /// Byte offset of the data section.
    #[must_use]
    pub fn data_start(&self) -> usize {
        self.offsets_start() + (self.key_count as usize + 1) * OFFSET_BYTES
    }

    /// Total size of a store with this header, or `None` on overflow.
    #[must_use]
    pub fn total_len(&self) -> Option<u64> {
        let offsets = self.key_count.checked_add(1)?.checked_mul(OFFSET_BYTES as u64)?;
        (HEADER_BYTES as u64)
            .checked_add(self.index_len)?
            .checked_add(offsets)?
            .checked_add(self.data_len)
    }
}

/// Writes `header` to `w` with the current magic.
pub fn write_header<W: Write>(w: &mut W, header: &Header) -> io::Result<()> {
    w.write_u32::<LittleEndian>(STORE_MAGIC)?;
    w.write_u16::<LittleEndian>(header.version)?;
    w.write_u16::<LittleEndian>(header.flags.bits())?;
    w.write_u64::<LittleEndian>(header.key_count)?;
    w.write_u64::<LittleEndian>(header.value_count)?;
    w.write_u64::<LittleEndian>(header.index_len)?;
    w.write_u64::<LittleEndian>(header.data_len)?;
    w.write_u32::<LittleEndian>(header.body_crc32)?;
    w.write_u32::<LittleEndian>(0)?;
    Ok(())
}

/// Reads and checks the header at the front of `buf`.
///
/// Validates the magic, the version, the flag bits, and that the sections
/// the header declares add up to exactly `buf.len()`. The body checksum is
/// left to the caller.
pub fn read_header(buf: &[u8]) -> Result<Header, StoreError> {
    if buf.len() < HEADER_BYTES {
        return Err(StoreError::malformed(format!(
            "buffer of {} bytes is smaller than the {}-byte header",
            buf.len(),
            HEADER_BYTES
        )));
    }
    let mut r = Cursor::new(&buf[..HEADER_BYTES]);
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != STORE_MAGIC {
        return Err(StoreError::malformed(format!("unknown store magic: {:#x}", magic)));
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(StoreError::malformed(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let flag_bits = r.read_u16::<LittleEndian>()?;
    if flag_bits & !KNOWN_FLAGS != 0 {
        return Err(StoreError::malformed(format!("unknown flag bits: {:#x}", flag_bits)));
    }
    let header = Header {
        version,
        flags: Flags::from_bits(flag_bits),
        key_count: r.read_u64::<LittleEndian>()?,
        value_count: r.read_u64::<LittleEndian>()?,
        index_len: r.read_u64::<LittleEndian>()?,
        data_len: r.read_u64::<LittleEndian>()?,
        body_crc32: r.read_u32::<LittleEndian>()?,
    };
    let _reserved = r.read_u32::<LittleEndian>()?;

    match header.total_len() {
        Some(total) if total == buf.len() as u64 => Ok(header),
        Some(total) => Err(StoreError::malformed(format!(
            "header declares {} bytes but buffer holds {}",
            total,
            buf.len()
        ))),
        None => Err(StoreError::malformed("section lengths overflow")),
    }
}

/// CRC32 of everything after the header.
#[must_use]
pub fn body_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[HEADER_BYTES.min(buf.len())..]);
    hasher.finalize()
}
