//! # Store - immutable perfect-hash multi-map
//!
//! A build-once, read-many map from binary keys to sets of binary values.
//! A [`Constructor`] accumulates `(key, value)` pairs, then
//! [`Constructor::build`] freezes them into a [`Store`]: one contiguous
//! buffer indexed by a minimal perfect hash, so a lookup is one hash walk and
//! one fingerprint and key comparison.
//!
//! The buffer *is* the serialized form. [`Store::serialize`] hands it out and
//! [`Store::from_bytes`] takes it back without copying.
//!
//! ## Layout (v1)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (48 bytes)                                             │
//! │                                                               │
//! │ magic "DDB1" (u32) | version (u16) | flags (u16)              │
//! │ key_count (u64) | value_count (u64)                           │
//! │ index_len (u64) | data_len (u64)                              │
//! │ body_crc32 (u32) | reserved (u32)                             │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX (index_len bytes)                                       │
//! │                                                               │
//! │ serialized mphf::PerfectHash: per-level seeds and bitsets,    │
//! │ then one u32 fingerprint per slot                             │
//! ├───────────────────────────────────────────────────────────────┤
//! │ OFFSETS ((key_count + 1) x u64)                               │
//! │                                                               │
//! │ slot -> start of its entry in DATA; the last entry is         │
//! │ data_len                                                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ DATA (data_len bytes), one entry per slot                     │
//! │                                                               │
//! │ key_len (varint) | key | value block                          │
//! │ value block: count (varint) | [len (varint) | value] x count  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fixed-width integers are little-endian. Flags: bit 0 = values
//! deduplicated per key, bit 1 = values in insertion order.
//!
//! ## Example
//!
//! ```rust
//! use store::{Constructor, Store};
//!
//! let mut cons = Constructor::new();
//! cons.add("fruit", "apple");
//! cons.add("fruit", "pear");
//! cons.add("color", "red");
//! let db = cons.build().unwrap();
//!
//! assert!(db.contains(b"fruit"));
//! assert_eq!(db.get(b"fruit").len(), 2);
//! assert!(db.get(b"missing").is_empty());
//!
//! let reloaded = Store::from_bytes(db.serialize()).unwrap();
//! assert_eq!(reloaded.peek(b"color"), Some(b"red".as_slice()));
//! ```

mod builder;
mod error;
pub mod format;
mod store;

pub use builder::{kvgroup, Constructor, Entry, KvGroup};
pub use config::{BuildOptions, IndexConfig, ValueOrder};
pub use error::{Result, StoreError};
pub use format::Flags;
pub use store::{Items, Keys, Store, StoreId, UniqueValues, ValueIter, ValueSet, Values};

#[cfg(test)]
mod tests;
