//! # MPHF - minimal perfect hash with fingerprints
//!
//! Maps each key of a fixed, deduplicated key set to a distinct slot in
//! `[0, n)`, and rejects keys outside the set with a per-slot fingerprint.
//!
//! ## Construction
//!
//! A multi-level "collide and peel" scheme. Level `i` hashes every key still
//! unplaced into `ceil(remaining * gamma)` bins with its own seed. Keys that
//! land alone in a bin are placed there; keys that collide fall through to
//! level `i + 1`. The set bits of all levels, ranked in level order, give the
//! dense slot numbers, so the table is minimal.
//!
//! An attempt that still has keys after `max_levels` levels is abandoned and
//! retried with a fresh seed, up to `max_attempts` times. After that the
//! build fails with [`IndexError::IndexConstructionFailed`]. Duplicate keys
//! always collide and therefore always exhaust the attempts.
//!
//! ## Lookup
//!
//! Walk the levels until a key's bin bit is set, rank the bit to get the
//! slot, then compare the key's 32-bit fingerprint with the one stored for
//! that slot. Any mismatch, or falling off the last level, is a miss.
//!
//! ## Wire format (all little-endian)
//!
//! ```text
//! [magic: u32 "MPH1"][key_count: u64][level_count: u32][reserved: u32]
//! per level:  [seed: u64][bins: u64][words: ceil(bins / 64) x u64]
//! [fingerprints: key_count x u32]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use config::IndexConfig;
use std::io::{self, Cursor, Write};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Magic number identifying a serialized index (ASCII "MPH1").
pub const INDEX_MAGIC: u32 = 0x4d50_4831;

/// Fixed-size prefix of the wire format.
pub const INDEX_HEADER_BYTES: usize = 4 + 8 + 4 + 4;

/// Seed for key fingerprints. Independent of the construction seed so that
/// fingerprints do not need to be stored per attempt.
const FINGERPRINT_SEED: u64 = 0x6a09_e667_f3bc_c908;

/// Upper bound on levels accepted from serialized input.
const MAX_SERIALIZED_LEVELS: u32 = 1024;

/// Errors from building or loading an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Every attempt ran out of levels with keys still unplaced.
    #[error("perfect hash construction failed for {keys} keys after {attempts} attempts")]
    IndexConstructionFailed { keys: usize, attempts: usize },

    /// Serialized input is truncated or fails a consistency check.
    #[error("malformed index: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// One level of the hash: a bitset of bins that hold exactly one key.
#[derive(Clone, PartialEq, Eq)]
struct Level {
    seed: u64,
    bins: u64,
    words: Vec<u64>,
    /// Slot number of the first set bit in each word, including all earlier
    /// levels. Derived on build/load, never serialized.
    ranks: Vec<u64>,
}

impl Level {
    fn new(seed: u64, bins: u64, words: Vec<u64>) -> Self {
        Self {
            seed,
            bins,
            words,
            ranks: Vec::new(),
        }
    }

    #[inline]
    fn bin_of(&self, key: &[u8]) -> u64 {
        reduce(xxh3_64_with_seed(key, self.seed), self.bins)
    }

    #[inline]
    fn is_set(&self, bin: u64) -> bool {
        let w = (bin >> 6) as usize;
        (self.words[w] >> (bin & 63)) & 1 == 1
    }

    #[inline]
    fn rank(&self, bin: u64) -> u64 {
        let w = (bin >> 6) as usize;
        let below = self.words[w] & ((1u64 << (bin & 63)) - 1);
        self.ranks[w] + below.count_ones() as u64
    }

    fn popcount(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }
}

/// A minimal perfect hash over a fixed key set, with per-slot fingerprints.
///
/// Built once with [`PerfectHash::build`] (or loaded with
/// [`PerfectHash::from_bytes`]) and read-only afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct PerfectHash {
    key_count: u64,
    levels: Vec<Level>,
    fingerprints: Vec<u32>,
}

impl PerfectHash {
    /// Builds an index over `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IndexConstructionFailed`] if no attempt places
    /// every key within `config.max_levels` levels.
    pub fn build<K: AsRef<[u8]>>(keys: &[K], config: &IndexConfig) -> Result<Self, IndexError> {
        Self::build_with_slots(keys, config).map(|(index, _)| index)
    }

    /// Builds an index over `keys` and also returns the slot assigned to
    /// each key, in input order.
    pub fn build_with_slots<K: AsRef<[u8]>>(
        keys: &[K],
        config: &IndexConfig,
    ) -> Result<(Self, Vec<usize>), IndexError> {
        let attempts = config.max_attempts.max(1);
        for attempt in 0..attempts {
            let seed = attempt_seed(config.seed, attempt as u64);
            match try_levels(keys, seed, config) {
                Some(levels) => {
                    tracing::debug!(
                        keys = keys.len(),
                        attempt,
                        levels = levels.len(),
                        "perfect hash levels placed"
                    );
                    let mut index = Self {
                        key_count: keys.len() as u64,
                        levels,
                        fingerprints: vec![0; keys.len()],
                    };
                    index.compute_ranks();
                    let mut slots = Vec::with_capacity(keys.len());
                    for key in keys {
                        let key = key.as_ref();
                        let slot = index.slot_unchecked(key).ok_or_else(|| {
                            IndexError::Malformed("placed key has no slot".to_string())
                        })?;
                        index.fingerprints[slot] = fingerprint(key);
                        slots.push(slot);
                    }
                    return Ok((index, slots));
                }
                None => {
                    tracing::warn!(
                        keys = keys.len(),
                        attempt,
                        max_levels = config.max_levels,
                        "perfect hash attempt ran out of levels, reseeding"
                    );
                }
            }
        }
        Err(IndexError::IndexConstructionFailed {
            keys: keys.len(),
            attempts,
        })
    }

    /// Returns the slot of `key`, or `None` if `key` is not in the set.
    ///
    /// A key outside the set is rejected unless it lands on an occupied slot
    /// *and* matches that slot's 32-bit fingerprint.
    #[must_use]
    pub fn locate(&self, key: &[u8]) -> Option<usize> {
        let slot = self.slot_unchecked(key)?;
        (self.fingerprints[slot] == fingerprint(key)).then_some(slot)
    }

    /// Number of keys (and slots).
    #[must_use]
    pub fn len(&self) -> usize {
        self.key_count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// Number of levels the construction used.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Size in bytes of the serialized form.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        INDEX_HEADER_BYTES
            + self
                .levels
                .iter()
                .map(|l| 16 + l.words.len() * 8)
                .sum::<usize>()
            + self.fingerprints.len() * 4
    }

    /// Average serialized bits per key.
    #[must_use]
    pub fn bits_per_key(&self) -> f64 {
        if self.key_count == 0 {
            return 0.0;
        }
        (self.serialized_size() * 8) as f64 / self.key_count as f64
    }

    /// Serializes the index to a writer. See the crate docs for the layout.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        w.write_u64::<LittleEndian>(self.key_count)?;
        w.write_u32::<LittleEndian>(self.levels.len() as u32)?;
        w.write_u32::<LittleEndian>(0)?;
        for level in &self.levels {
            w.write_u64::<LittleEndian>(level.seed)?;
            w.write_u64::<LittleEndian>(level.bins)?;
            for &word in &level.words {
                w.write_u64::<LittleEndian>(word)?;
            }
        }
        for &fp in &self.fingerprints {
            w.write_u32::<LittleEndian>(fp)?;
        }
        Ok(())
    }

    /// Parses an index from exactly `data`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Malformed`] on a bad magic, truncated input,
    /// trailing bytes, or when the placed bins do not add up to the declared
    /// key count.
    pub fn from_bytes(data: &[u8]) -> Result<Self, IndexError> {
        if data.len() < INDEX_HEADER_BYTES {
            return Err(malformed("index shorter than its header"));
        }
        let mut r = Cursor::new(data);
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::Malformed(format!("bad index magic: {:#x}", magic)));
        }
        let key_count = r.read_u64::<LittleEndian>()?;
        let level_count = r.read_u32::<LittleEndian>()?;
        let _reserved = r.read_u32::<LittleEndian>()?;
        if level_count > MAX_SERIALIZED_LEVELS {
            return Err(IndexError::Malformed(format!("too many levels: {}", level_count)));
        }

        let mut levels = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count {
            if remaining(&r) < 16 {
                return Err(malformed("truncated level header"));
            }
            let seed = r.read_u64::<LittleEndian>()?;
            let bins = r.read_u64::<LittleEndian>()?;
            if bins == 0 {
                return Err(malformed("level with zero bins"));
            }
            let word_count = bins.div_ceil(64);
            if word_count > (remaining(&r) / 8) as u64 {
                return Err(malformed("truncated level bitset"));
            }
            let mut words = Vec::with_capacity(word_count as usize);
            for _ in 0..word_count {
                words.push(r.read_u64::<LittleEndian>()?);
            }
            let tail_bits = bins % 64;
            if tail_bits != 0 {
                let last = words[words.len() - 1];
                if last >> tail_bits != 0 {
                    return Err(malformed("bits set beyond last bin"));
                }
            }
            levels.push(Level::new(seed, bins, words));
        }

        if key_count > (remaining(&r) / 4) as u64 {
            return Err(malformed("truncated fingerprint table"));
        }
        let mut fingerprints = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            fingerprints.push(r.read_u32::<LittleEndian>()?);
        }
        if remaining(&r) != 0 {
            return Err(malformed("trailing bytes after fingerprint table"));
        }

        let placed: u64 = levels.iter().map(Level::popcount).sum();
        if placed != key_count {
            return Err(IndexError::Malformed(format!(
                "levels place {} keys but header declares {}",
                placed, key_count
            )));
        }

        let mut index = Self {
            key_count,
            levels,
            fingerprints,
        };
        index.compute_ranks();
        Ok(index)
    }

    // ---- Internal helpers ----

    /// Slot for `key` without the fingerprint check.
    fn slot_unchecked(&self, key: &[u8]) -> Option<usize> {
        for level in &self.levels {
            let bin = level.bin_of(key);
            if level.is_set(bin) {
                return Some(level.rank(bin) as usize);
            }
        }
        None
    }

    fn compute_ranks(&mut self) {
        let mut running = 0u64;
        for level in &mut self.levels {
            level.ranks = Vec::with_capacity(level.words.len());
            for &word in &level.words {
                level.ranks.push(running);
                running += word.count_ones() as u64;
            }
        }
    }
}

impl std::fmt::Debug for PerfectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfectHash")
            .field("key_count", &self.key_count)
            .field("levels", &self.levels.len())
            .field("bytes", &self.serialized_size())
            .finish()
    }
}

/// 32-bit fingerprint stored per slot.
#[inline]
#[must_use]
pub fn fingerprint(key: &[u8]) -> u32 {
    (xxh3_64_with_seed(key, FINGERPRINT_SEED) >> 32) as u32
}

/// Runs one construction attempt. Returns `None` if keys remain after
/// `config.max_levels` levels.
fn try_levels<K: AsRef<[u8]>>(keys: &[K], seed: u64, config: &IndexConfig) -> Option<Vec<Level>> {
    let gamma = config.effective_gamma();
    let mut remaining: Vec<usize> = (0..keys.len()).collect();
    let mut levels = Vec::new();
    let mut bins_of: Vec<u64> = Vec::with_capacity(keys.len());

    for depth in 0..config.max_levels {
        if remaining.is_empty() {
            break;
        }
        let level_seed = splitmix64(seed ^ (depth as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let bins = ((remaining.len() as f64 * gamma).ceil() as u64).max(1);
        let word_count = bins.div_ceil(64) as usize;
        let mut seen = vec![0u64; word_count];
        let mut collided = vec![0u64; word_count];

        bins_of.clear();
        for &ix in &remaining {
            let bin = reduce(xxh3_64_with_seed(keys[ix].as_ref(), level_seed), bins);
            let (w, bit) = ((bin >> 6) as usize, 1u64 << (bin & 63));
            if seen[w] & bit != 0 {
                collided[w] |= bit;
            } else {
                seen[w] |= bit;
            }
            bins_of.push(bin);
        }

        let words: Vec<u64> = seen
            .iter()
            .zip(&collided)
            .map(|(s, c)| s & !c)
            .collect();

        let next: Vec<usize> = remaining
            .iter()
            .zip(&bins_of)
            .filter(|&(_, &bin)| (words[(bin >> 6) as usize] >> (bin & 63)) & 1 == 0)
            .map(|(&ix, _)| ix)
            .collect();

        levels.push(Level::new(level_seed, bins, words));
        remaining = next;
    }

    remaining.is_empty().then_some(levels)
}

/// Maps a 64-bit hash uniformly onto `[0, n)` without a division.
#[inline]
fn reduce(hash: u64, n: u64) -> u64 {
    ((hash as u128 * n as u128) >> 64) as u64
}

fn attempt_seed(base: u64, attempt: u64) -> u64 {
    splitmix64(base.wrapping_add(attempt.wrapping_mul(0xd1b5_4a32_d192_ed03)))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn remaining(r: &Cursor<&[u8]>) -> usize {
    r.get_ref().len().saturating_sub(r.position() as usize)
}

fn malformed(msg: &str) -> IndexError {
    IndexError::Malformed(msg.to_string())
}
