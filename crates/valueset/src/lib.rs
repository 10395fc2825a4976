//! # ValueSet - per-key value block codec
//!
//! Encodes the values bound to one key as a self-delimiting block of
//! length-prefixed records, and decodes such a block lazily without copying
//! or allocating.
//!
//! ## Block layout
//!
//! ```text
//! [count: varint][len: varint | bytes] x count
//! ```
//!
//! Varints are unsigned LEB128: 7 payload bits per byte, high bit set on
//! every byte except the last. A `u64` takes at most 10 bytes.
//!
//! Decoding never reads past the block it was given. A length prefix that
//! would do so, a count that disagrees with the records present, or trailing
//! bytes after the last record are all reported as
//! [`CodecError::CorruptRecord`].
//!
//! ## Example
//!
//! ```rust
//! let block = valueset::encode(&[b"apple".as_slice(), b"pear".as_slice()]);
//! let values: Vec<&[u8]> = valueset::decode(&block)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(values, vec![b"apple".as_slice(), b"pear".as_slice()]);
//! ```

use thiserror::Error;

/// Maximum encoded size of a `u64` varint.
pub const MAX_VARINT_BYTES: usize = 10;

/// Errors raised while decoding a value block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A length prefix or count ran past the end of the block.
    #[error("corrupt record at byte {offset}: {reason}")]
    CorruptRecord {
        /// Byte position inside the block where decoding failed.
        offset: usize,
        /// What was wrong.
        reason: &'static str,
    },
}

impl CodecError {
    fn corrupt(offset: usize, reason: &'static str) -> Self {
        CodecError::CorruptRecord { offset, reason }
    }
}

// -------------------- Varints --------------------

/// Appends `value` to `out` as an unsigned LEB128 varint.
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes [`put_varint`] would write for `value`.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.max(1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decodes a varint from the front of `input`, returning the value and the
/// number of bytes it occupied.
///
/// Returns `None` if `input` ends mid-varint or the varint overflows `u64`.
#[must_use]
pub fn get_varint(input: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in input.iter().take(MAX_VARINT_BYTES).enumerate() {
        let payload = (byte & 0x7f) as u64;
        if i == MAX_VARINT_BYTES - 1 && payload > 1 {
            return None;
        }
        value |= payload << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Reads one varint-length-prefixed byte string from `block` at `*pos`,
/// advancing `*pos` past it.
///
/// This is the building block for every record in a value block, and is
/// also used by the store for its key records.
pub fn read_prefixed<'a>(block: &'a [u8], pos: &mut usize) -> Result<&'a [u8], CodecError> {
    let start = *pos;
    let tail = block
        .get(start..)
        .ok_or_else(|| CodecError::corrupt(start, "position past block"))?;
    let (len, n) =
        get_varint(tail).ok_or_else(|| CodecError::corrupt(start, "truncated length prefix"))?;
    let body = start + n;
    let remaining = (block.len() - body) as u64;
    if len > remaining {
        return Err(CodecError::corrupt(start, "length prefix runs past block"));
    }
    let end = body + len as usize;
    *pos = end;
    Ok(&block[body..end])
}

/// Appends `bytes` to `out` with a varint length prefix.
pub fn write_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

// -------------------- Encode --------------------

/// Encodes `values` as a standalone value block.
#[must_use]
pub fn encode<V: AsRef<[u8]>>(values: &[V]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(values));
    encode_into(&mut out, values);
    out
}

/// Appends the value block for `values` to `out`.
pub fn encode_into<V: AsRef<[u8]>>(out: &mut Vec<u8>, values: &[V]) {
    put_varint(out, values.len() as u64);
    for v in values {
        write_prefixed(out, v.as_ref());
    }
}

/// Exact size in bytes of the block [`encode`] produces for `values`.
#[must_use]
pub fn encoded_len<V: AsRef<[u8]>>(values: &[V]) -> usize {
    varint_len(values.len() as u64)
        + values
            .iter()
            .map(|v| {
                let len = v.as_ref().len();
                varint_len(len as u64) + len
            })
            .sum::<usize>()
}

// -------------------- Decode --------------------

/// Starts a lazy decode of `block`.
///
/// Each call returns a fresh iterator over the same bytes, so a block can be
/// re-read any number of times. The count prefix is read eagerly; a block
/// too short to hold it yields a single error.
pub fn decode(block: &[u8]) -> Records<'_> {
    match get_varint(block) {
        Some((count, n)) => Records {
            block,
            pos: n,
            remaining: count,
            pending: None,
            fused: false,
        },
        None => Records {
            block,
            pos: 0,
            remaining: 0,
            pending: Some(CodecError::corrupt(0, "truncated count prefix")),
            fused: false,
        },
    }
}

/// Walks the whole block and returns its record count, or the first error.
///
/// A block is valid when it holds exactly `count` records and nothing after
/// them.
pub fn validate(block: &[u8]) -> Result<u64, CodecError> {
    let mut records = decode(block);
    let count = records.remaining;
    for r in records.by_ref() {
        r?;
    }
    if records.pos != block.len() {
        return Err(CodecError::corrupt(records.pos, "trailing bytes after last record"));
    }
    Ok(count)
}

/// Lazy iterator over the records of one value block.
///
/// Yields borrowed slices of the block. After the first error it is fused
/// and yields nothing more.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    block: &'a [u8],
    pos: usize,
    remaining: u64,
    pending: Option<CodecError>,
    fused: bool,
}

impl<'a> Records<'a> {
    /// Number of records declared by the block that have not been yielded.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn fail(&mut self, err: CodecError) -> Option<Result<&'a [u8], CodecError>> {
        self.fused = true;
        self.remaining = 0;
        Some(Err(err))
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<&'a [u8], CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return self.fail(err);
        }
        if self.fused || self.remaining == 0 {
            return None;
        }
        if self.pos >= self.block.len() {
            return self.fail(CodecError::corrupt(
                self.block.len(),
                "count exceeds records in block",
            ));
        }
        match read_prefixed(self.block, &mut self.pos) {
            Ok(v) => {
                self.remaining -= 1;
                Some(Ok(v))
            }
            Err(e) => self.fail(e),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.pending.is_some() {
            return (1, Some(1));
        }
        (0, usize::try_from(self.remaining).ok().map(|n| n.saturating_add(1)))
    }
}

#[cfg(test)]
mod tests;
