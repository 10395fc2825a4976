use byteorder::{LittleEndian, WriteBytesExt};
use config::{BuildOptions, ValueOrder};
use mphf::PerfectHash;
use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::format::{body_checksum, write_header, Flags, Header, FORMAT_VERSION, HEADER_BYTES};
use crate::store::Store;

/// One builder input: a single value, or a batch of values, for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    One(Vec<u8>),
    Many(Vec<Vec<u8>>),
}

impl From<Vec<u8>> for Entry {
    fn from(v: Vec<u8>) -> Self {
        Entry::One(v)
    }
}

impl From<&[u8]> for Entry {
    fn from(v: &[u8]) -> Self {
        Entry::One(v.to_vec())
    }
}

impl From<Vec<Vec<u8>>> for Entry {
    fn from(vs: Vec<Vec<u8>>) -> Self {
        Entry::Many(vs)
    }
}

/// Values accumulated for one key.
#[derive(Debug)]
enum Pending {
    /// Dedup on: each distinct value with the ordinal of its first insertion.
    Distinct(FxHashMap<Vec<u8>, usize>),
    /// Dedup off: every value as added.
    All(Vec<Vec<u8>>),
}

impl Pending {
    fn new(dedup: bool) -> Self {
        if dedup {
            Pending::Distinct(FxHashMap::default())
        } else {
            Pending::All(Vec::new())
        }
    }

    fn push(&mut self, value: &[u8]) {
        match self {
            Pending::Distinct(seen) => {
                let next = seen.len();
                seen.entry(value.to_vec()).or_insert(next);
            }
            Pending::All(values) => values.push(value.to_vec()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Pending::Distinct(seen) => seen.len(),
            Pending::All(values) => values.len(),
        }
    }

    /// Consumes the accumulator, returning values in their final order.
    fn into_values(self, order: ValueOrder) -> Vec<Vec<u8>> {
        let mut values = match self {
            Pending::Distinct(seen) => {
                let mut ordered: Vec<(Vec<u8>, usize)> = seen.into_iter().collect();
                ordered.sort_unstable_by_key(|(_, ordinal)| *ordinal);
                ordered.into_iter().map(|(v, _)| v).collect()
            }
            Pending::All(values) => values,
        };
        if order == ValueOrder::Unspecified {
            values.sort_unstable();
        }
        values
    }
}

/// Accumulates `(key, value)` pairs and builds an immutable [`Store`].
///
/// Pairs may arrive in any order and keys may repeat; each key's
/// contributions are merged. With dedup on (the default) a value added twice
/// under the same key is kept once, in the position of its first addition.
///
/// [`build`](Constructor::build) consumes the constructor, so a finished
/// store never shares state with one still being filled.
///
/// Not thread-safe for concurrent mutation; use one constructor per thread.
#[derive(Debug)]
pub struct Constructor {
    options: BuildOptions,
    entries: FxHashMap<Vec<u8>, Pending>,
    value_count: usize,
}

impl Constructor {
    /// Creates an empty constructor with default options.
    pub fn new() -> Self {
        Self::with_options(BuildOptions::default())
    }

    pub fn with_options(options: BuildOptions) -> Self {
        Self {
            options,
            entries: FxHashMap::default(),
            value_count: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Adds one value under `key`.
    pub fn add(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        let pending = self.pending_mut(key.as_ref());
        let before = pending.len();
        pending.push(value.as_ref());
        let grew = pending.len() - before;
        self.value_count += grew;
    }

    /// Adds every value in `values` under `key`. An empty `values` still
    /// records `key`, with no values.
    pub fn add_values<I, V>(&mut self, key: impl AsRef<[u8]>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let pending = self.pending_mut(key.as_ref());
        let before = pending.len();
        for v in values {
            pending.push(v.as_ref());
        }
        let grew = pending.len() - before;
        self.value_count += grew;
    }

    /// Adds one tagged entry.
    pub fn add_entry(&mut self, key: impl AsRef<[u8]>, entry: Entry) {
        match entry {
            Entry::One(v) => self.add(key, v),
            Entry::Many(vs) => self.add_values(key, vs),
        }
    }

    /// Number of distinct keys so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of values that will be stored (after dedup, if on).
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.value_count
    }

    /// Freezes the key set, builds the perfect-hash index and lays every
    /// key's values out in slot order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexConstructionFailed`] if the index could not
    /// be built within the configured attempts.
    pub fn build(self) -> Result<Store> {
        let options = self.options;
        let mut entries: Vec<(Vec<u8>, Vec<Vec<u8>>)> = self
            .entries
            .into_iter()
            .map(|(k, pending)| (k, pending.into_values(options.value_order)))
            .collect();

        let (index, slots) = PerfectHash::build_with_slots(
            &entries.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            &options.index,
        )?;

        // Reorder entries so position == slot.
        let mut by_slot: Vec<Option<(Vec<u8>, Vec<Vec<u8>>)>> =
            (0..entries.len()).map(|_| None).collect();
        for (entry, slot) in entries.drain(..).zip(slots) {
            by_slot[slot] = Some(entry);
        }

        let mut offsets: Vec<u64> = Vec::with_capacity(by_slot.len() + 1);
        let mut data: Vec<u8> = Vec::new();
        let mut value_count = 0u64;
        for (slot, entry) in by_slot.into_iter().enumerate() {
            let (key, values) = entry.ok_or_else(|| {
                StoreError::malformed(format!("perfect hash left slot {} empty", slot))
            })?;
            offsets.push(data.len() as u64);
            valueset::write_prefixed(&mut data, &key);
            valueset::encode_into(&mut data, &values);
            value_count += values.len() as u64;
        }
        offsets.push(data.len() as u64);

        let mut body: Vec<u8> = Vec::with_capacity(
            index.serialized_size() + offsets.len() * 8 + data.len(),
        );
        index.write_to(&mut body)?;
        let index_len = body.len() as u64;
        for off in &offsets {
            body.write_u64::<LittleEndian>(*off)?;
        }
        body.extend_from_slice(&data);

        let mut crc = crc32fast::Hasher::new();
        crc.update(&body);
        let header = Header {
            version: FORMAT_VERSION,
            flags: Flags {
                dedup_values: options.dedup_values,
                insertion_order: options.preserves_order(),
            },
            key_count: index.len() as u64,
            value_count,
            index_len,
            data_len: data.len() as u64,
            body_crc32: crc.finalize(),
        };

        let mut buf = Vec::with_capacity(HEADER_BYTES + body.len());
        write_header(&mut buf, &header)?;
        buf.extend_from_slice(&body);
        debug_assert_eq!(body_checksum(&buf), header.body_crc32);

        tracing::info!(
            keys = header.key_count,
            values = value_count,
            levels = index.level_count(),
            index_bits_per_key = index.bits_per_key(),
            bytes = buf.len(),
            "store built"
        );

        Store::from_bytes(buf)
    }

    fn pending_mut(&mut self, key: &[u8]) -> &mut Pending {
        let dedup = self.options.dedup_values;
        self.entries
            .entry(key.to_vec())
            .or_insert_with(|| Pending::new(dedup))
    }
}

impl Default for Constructor {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AsRef<[u8]>> Extend<(K, Entry)> for Constructor {
    fn extend<I: IntoIterator<Item = (K, Entry)>>(&mut self, iter: I) {
        for (k, entry) in iter {
            self.add_entry(k, entry);
        }
    }
}

/// Groups a key-sorted stream of `(key, value)` pairs into runs of
/// `(key, values)`.
///
/// Only adjacent equal keys are merged; an unsorted stream yields one run
/// per change of key.
pub fn kvgroup<I, K, V>(pairs: I) -> KvGroup<I::IntoIter>
where
    I: IntoIterator<Item = (K, V)>,
    K: PartialEq,
{
    KvGroup {
        inner: pairs.into_iter(),
        pending: None,
    }
}

/// Iterator returned by [`kvgroup`].
pub struct KvGroup<I: Iterator> {
    inner: I,
    pending: Option<I::Item>,
}

impl<I, K, V> Iterator for KvGroup<I>
where
    I: Iterator<Item = (K, V)>,
    K: PartialEq,
{
    type Item = (K, Vec<V>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, first) = self.pending.take().or_else(|| self.inner.next())?;
        let mut values = vec![first];
        for (k, v) in self.inner.by_ref() {
            if k == key {
                values.push(v);
            } else {
                self.pending = Some((k, v));
                break;
            }
        }
        Some((key, values))
    }
}
