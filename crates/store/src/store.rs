use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use mphf::PerfectHash;
use rustc_hash::FxHashSet;
use std::io::{Read, Write};
use valueset::{read_prefixed, Records};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, StoreError};
use crate::format::{body_checksum, read_header, Flags, Header, HEADER_BYTES, OFFSET_BYTES};

/// Value block of a key with no values: a zero count.
const EMPTY_BLOCK: &[u8] = &[0];

/// Content identity of a store, used to bind views to the store they were
/// made from.
///
/// Two stores loaded from the same bytes share an identity. Distinct stores
/// share one only if both the CRC32 and the 64-bit xxh3 of their bodies
/// collide at the same length and key count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId {
    pub body_crc32: u32,
    pub body_xxh3: u64,
    pub len: u64,
    pub key_count: u64,
}

/// An immutable multi-map from binary keys to sets of binary values.
///
/// A `Store` wraps one serialized buffer (see [`crate::format`]) together
/// with the perfect-hash index parsed from it. Every read borrows from that
/// buffer; nothing is copied or decoded up front beyond the index.
///
/// Loading ([`Store::from_bytes`]) validates the whole buffer once: header,
/// checksum, index consistency, every offset, every key, every value block.
/// After that, reads cannot fail and never allocate except for
/// [`unique_values`](Store::unique_values), which tracks what it has seen.
///
/// Cloning is cheap: the buffer is reference counted and the index is
/// copied.
#[derive(Clone)]
pub struct Store {
    buf: Bytes,
    header: Header,
    index: PerfectHash,
    body_xxh3: u64,
}

impl Store {
    /// Loads a store from its serialized form without copying it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::MalformedStore`] on a bad magic or version, a size
    ///   mismatch, a checksum mismatch, or an index / offset table that
    ///   disagrees with the declared key count.
    /// - [`StoreError::CorruptRecord`] if a key or value record in some slot
    ///   runs past its entry.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let buf: Bytes = data.into();
        let header = read_header(&buf)?;

        let actual_crc = body_checksum(&buf);
        if actual_crc != header.body_crc32 {
            return Err(StoreError::malformed(format!(
                "body checksum mismatch: expected {:#010x}, got {:#010x}",
                header.body_crc32, actual_crc
            )));
        }

        let index = PerfectHash::from_bytes(&buf[header.index_start()..header.offsets_start()])?;
        if index.len() as u64 != header.key_count {
            return Err(StoreError::malformed(format!(
                "index holds {} slots but header declares {} keys",
                index.len(),
                header.key_count
            )));
        }

        let body_xxh3 = xxh3_64(&buf[HEADER_BYTES..]);
        let store = Self {
            buf,
            header,
            index,
            body_xxh3,
        };
        store.validate()?;
        tracing::debug!(
            keys = store.header.key_count,
            values = store.header.value_count,
            bytes = store.buf.len(),
            "store loaded"
        );
        Ok(store)
    }

    /// Loads a store from a byte slice, copying it.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Reads a serialized store from `r` until EOF.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    /// The serialized form. Cheap: shares the backing buffer.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        self.buf.clone()
    }

    /// The serialized form as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Writes the serialized form to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.buf)
    }

    /// The backing buffer, for callers that want to keep zero-copy slices
    /// of keys or values alive independently of the store.
    #[must_use]
    pub fn buffer(&self) -> &Bytes {
        &self.buf
    }

    /// Content identity of this store.
    #[must_use]
    pub fn id(&self) -> StoreId {
        StoreId {
            body_crc32: self.header.body_crc32,
            body_xxh3: self.body_xxh3,
            len: self.buf.len() as u64,
            key_count: self.header.key_count,
        }
    }

    /// Flags recorded at build time.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.key_count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.key_count == 0
    }

    /// Total number of values across all keys (the length of
    /// [`values`](Store::values)).
    #[must_use]
    pub fn value_count(&self) -> u64 {
        self.header.value_count
    }

    /// Number of levels in the perfect-hash index.
    #[must_use]
    pub fn index_levels(&self) -> usize {
        self.index.level_count()
    }

    /// Returns `true` if `key` was present at build time.
    ///
    /// The index rejects most absent keys by fingerprint; the stored key
    /// bytes are compared as well, so an absent key is never reported.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.slot_of(key).is_some()
    }

    /// The values stored under `key`, or an empty set if it is absent.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> ValueSet<'_> {
        match self.slot_of(key).and_then(|slot| self.entry(slot)) {
            Some((_, block)) => ValueSet::new(block),
            None => ValueSet::empty(),
        }
    }

    /// First value stored under `key`, if any.
    #[must_use]
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.get(key).iter().next()
    }

    /// All keys, in slot order.
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            store: self,
            slot: 0,
        }
    }

    /// Every key's values concatenated in slot order. A value stored under
    /// several keys appears once per key.
    pub fn values(&self) -> Values<'_> {
        Values {
            store: self,
            slot: 0,
            current: ValueSet::empty().iter(),
        }
    }

    /// Every distinct value, in order of first appearance in
    /// [`values`](Store::values).
    pub fn unique_values(&self) -> UniqueValues<'_> {
        UniqueValues {
            values: self.values(),
            seen: FxHashSet::default(),
        }
    }

    /// `(key, values)` pairs in slot order.
    pub fn items(&self) -> Items<'_> {
        Items {
            store: self,
            slot: 0,
        }
    }

    // ---- Internal helpers ----

    fn slot_of(&self, key: &[u8]) -> Option<usize> {
        let slot = self.index.locate(key)?;
        let (stored, _) = self.entry(slot)?;
        (stored == key).then_some(slot)
    }

    fn offset(&self, slot: usize) -> usize {
        let at = self.header.offsets_start() + slot * OFFSET_BYTES;
        LittleEndian::read_u64(&self.buf[at..at + OFFSET_BYTES]) as usize
    }

    /// Splits the entry for `slot` into its key and its value block.
    ///
    /// Only `None` for a slot out of range; every entry was checked on load.
    fn entry(&self, slot: usize) -> Option<(&[u8], &[u8])> {
        if slot >= self.len() {
            return None;
        }
        let data = &self.buf[self.header.data_start()..];
        let entry = &data[self.offset(slot)..self.offset(slot + 1)];
        let mut pos = 0;
        let key = read_prefixed(entry, &mut pos).ok()?;
        Some((key, &entry[pos..]))
    }

    /// Walks every offset and entry once, so later reads can assume a
    /// well-formed buffer.
    fn validate(&self) -> Result<()> {
        let data_len = self.header.data_len as usize;
        if self.offset(0) != 0 {
            return Err(StoreError::malformed("first entry does not start at offset 0"));
        }
        if self.offset(self.len()) != data_len {
            return Err(StoreError::malformed("offset table does not end at data length"));
        }

        let data = &self.buf[self.header.data_start()..];
        let mut values = 0u64;
        let mut prev = 0usize;
        for slot in 0..self.len() {
            let end = self.offset(slot + 1);
            if end < prev || end > data_len {
                return Err(StoreError::malformed(format!(
                    "offset for slot {} is out of order",
                    slot + 1
                )));
            }
            let entry = &data[prev..end];
            let mut pos = 0;
            let key = read_prefixed(entry, &mut pos)
                .map_err(|source| StoreError::CorruptRecord { slot, source })?;
            values += valueset::validate(&entry[pos..])
                .map_err(|source| StoreError::CorruptRecord { slot, source })?;
            if self.index.locate(key) != Some(slot) {
                return Err(StoreError::malformed(format!(
                    "key in slot {} does not hash to its slot",
                    slot
                )));
            }
            prev = end;
        }

        if values != self.header.value_count {
            return Err(StoreError::malformed(format!(
                "entries hold {} values but header declares {}",
                values, self.header.value_count
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.header.key_count)
            .field("values", &self.header.value_count)
            .field("flags", &self.header.flags)
            .field("bytes", &self.buf.len())
            .field("index", &self.index)
            .finish()
    }
}

/// The values bound to one key.
///
/// A lightweight handle over the key's value block: [`iter`](ValueSet::iter)
/// may be called any number of times and each call starts from the first
/// value.
#[derive(Debug, Clone, Copy)]
pub struct ValueSet<'a> {
    block: &'a [u8],
}

impl<'a> ValueSet<'a> {
    fn new(block: &'a [u8]) -> Self {
        Self { block }
    }

    fn empty() -> Self {
        Self { block: EMPTY_BLOCK }
    }

    /// Fresh iterator over the values.
    pub fn iter(&self) -> ValueIter<'a> {
        ValueIter {
            records: valueset::decode(self.block),
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        valueset::decode(self.block).remaining() as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `value` is one of the values. Linear in the set.
    #[must_use]
    pub fn contains(&self, value: &[u8]) -> bool {
        self.iter().any(|v| v == value)
    }

    /// Copies the values out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        self.iter().map(<[u8]>::to_vec).collect()
    }
}

impl<'a> IntoIterator for ValueSet<'a> {
    type Item = &'a [u8];
    type IntoIter = ValueIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over one key's values.
#[derive(Debug, Clone)]
pub struct ValueIter<'a> {
    records: Records<'a>,
}

impl<'a> Iterator for ValueIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self.records.next()? {
            Ok(v) => Some(v),
            Err(e) => {
                // Blocks are validated on load, so this means the buffer was
                // modified underneath us.
                tracing::error!(error = %e, "value block failed to decode after validation");
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.records.remaining() as usize;
        (n, Some(n))
    }
}

/// Iterator over every key, in slot order.
#[derive(Debug, Clone)]
pub struct Keys<'a> {
    store: &'a Store,
    slot: usize,
}

impl<'a> Iterator for Keys<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let (key, _) = self.store.entry(self.slot)?;
        self.slot += 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.store.len().saturating_sub(self.slot);
        (n, Some(n))
    }
}

/// Iterator over every value of every key, in slot order.
#[derive(Debug, Clone)]
pub struct Values<'a> {
    store: &'a Store,
    slot: usize,
    current: ValueIter<'a>,
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.current.next() {
                return Some(v);
            }
            let (_, block) = self.store.entry(self.slot)?;
            self.slot += 1;
            self.current = ValueSet::new(block).iter();
        }
    }
}

/// Iterator over distinct values, in order of first appearance.
#[derive(Debug, Clone)]
pub struct UniqueValues<'a> {
    values: Values<'a>,
    seen: FxHashSet<&'a [u8]>,
}

impl<'a> Iterator for UniqueValues<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let seen = &mut self.seen;
        self.values.by_ref().find(|v| seen.insert(*v))
    }
}

/// Iterator over `(key, values)` pairs, in slot order.
#[derive(Debug, Clone)]
pub struct Items<'a> {
    store: &'a Store,
    slot: usize,
}

impl<'a> Iterator for Items<'a> {
    type Item = (&'a [u8], ValueSet<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, block) = self.store.entry(self.slot)?;
        self.slot += 1;
        Some((key, ValueSet::new(block)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.store.len().saturating_sub(self.slot);
        (n, Some(n))
    }
}
