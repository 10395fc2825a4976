use bytes::Bytes;
use rustc_hash::FxHashSet;
use std::slice;
use store::{Store, StoreId};

/// A query-time restriction of one store's value domain.
///
/// Built from a store and a dataset of wanted values: the view admits the
/// values that are both wanted and present in the store. Bound to the
/// store it was built from; applying it to another store is a
/// [`ViewMismatch`](crate::QueryError::ViewMismatch).
///
/// Admitted values are shared slices of the store's buffer, so a view does
/// not borrow the store and may outlive it.
#[derive(Debug, Clone)]
pub struct View {
    store_id: StoreId,
    /// Admitted values in the store's `unique_values` order.
    domain: Vec<Bytes>,
    members: FxHashSet<Bytes>,
}

impl View {
    pub fn new<I, V>(store: &Store, dataset: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        let wanted: FxHashSet<Vec<u8>> = dataset.into_iter().map(|v| v.as_ref().to_vec()).collect();
        let buf = store.buffer();
        let domain: Vec<Bytes> = store
            .unique_values()
            .filter(|v| wanted.contains(*v))
            .map(|v| buf.slice_ref(v))
            .collect();
        let members: FxHashSet<Bytes> = domain.iter().cloned().collect();

        tracing::debug!(
            wanted = wanted.len(),
            admitted = domain.len(),
            "view built"
        );
        Self {
            store_id: store.id(),
            domain,
            members,
        }
    }

    /// Identity of the store this view is bound to.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    #[must_use]
    pub fn is_bound_to(&self, store: &Store) -> bool {
        self.store_id == store.id()
    }

    #[must_use]
    pub fn contains(&self, value: &[u8]) -> bool {
        self.members.contains(value)
    }

    /// Number of admitted values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    /// Admitted values, in the store's `unique_values` order.
    pub fn iter(&self) -> ViewIter<'_> {
        ViewIter {
            inner: self.domain.iter(),
        }
    }
}

impl<'a> IntoIterator for &'a View {
    type Item = &'a [u8];
    type IntoIter = ViewIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ViewIter<'a> {
    inner: slice::Iter<'a, Bytes>,
}

impl<'a> Iterator for ViewIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|b| b.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
