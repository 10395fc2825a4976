use store::{StoreError, StoreId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The view was built from a different store than the one queried.
    #[error("view belongs to store {expected:?} but was applied to store {found:?}")]
    ViewMismatch { expected: StoreId, found: StoreId },

    #[error(transparent)]
    Store(#[from] StoreError),
}
