use mphf::IndexError;
use std::io;
use thiserror::Error;
use valueset::CodecError;

/// Errors raised while building, loading, or reading a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Perfect-hash construction exhausted its attempts. Fatal for the build.
    #[error("index construction failed for {keys} keys after {attempts} attempts")]
    IndexConstructionFailed { keys: usize, attempts: usize },

    /// The buffer is not a store: bad magic or version, truncated, or an
    /// internal consistency check failed.
    #[error("malformed store: {0}")]
    MalformedStore(String),

    /// A key or value record in one slot runs past its declared boundary.
    #[error("corrupt record in slot {slot}: {source}")]
    CorruptRecord {
        slot: usize,
        #[source]
        source: CodecError,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        StoreError::MalformedStore(msg.into())
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::IndexConstructionFailed { keys, attempts } => {
                StoreError::IndexConstructionFailed { keys, attempts }
            }
            IndexError::Malformed(msg) => StoreError::MalformedStore(msg),
            IndexError::Io(e) => StoreError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
