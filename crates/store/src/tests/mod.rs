
use crate::*;

/// The fruit/color store used across test files.
pub(crate) fn sample_store() -> Result<Store> {
    let mut cons = Constructor::new();
    cons.add("fruit", "apple");
    cons.add("fruit", "pear");
    cons.add("color", "red");
    cons.add("color", "green");
    cons.build()
}

pub(crate) fn values_of(db: &Store, key: &[u8]) -> Vec<Vec<u8>> {
    db.get(key).to_vec()
}
