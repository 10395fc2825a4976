//! # Query - boolean set algebra over a store
//!
//! A [`Query`] is a small immutable tree: leaves name keys, inner nodes
//! combine the value sets of their children.
//!
//! | Node            | Result                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `Literal(key)`  | the values stored under `key`                           |
//! | `And(children)` | values present in every child                           |
//! | `Or(children)`  | values present in any child, in order of first appearance |
//! | `Not(child)`    | the value domain minus the child's values               |
//! | `Cluster(child)`| same as `child`; one attribution unit in a metaquery    |
//!
//! The value domain for `Not` is the store's distinct values, or the
//! values a [`View`] admits when one is bound.
//!
//! [`Query::evaluate`] returns a lazy iterator: nothing is read from the
//! store until the first value is pulled, and dropping the iterator stops
//! all work. [`Query::metaquery`] instead yields `(unit, value)` pairs that
//! attribute each matching value to the sub-query that produced it.
//!
//! ```rust
//! use query::Query;
//! use store::Constructor;
//!
//! let mut cons = Constructor::new();
//! cons.add("fruit", "apple");
//! cons.add("red", "apple");
//! cons.add("red", "cherry");
//! let db = cons.build().unwrap();
//!
//! let q = Query::literal("fruit") & Query::literal("red");
//! let hits: Vec<&[u8]> = q.evaluate(&db, None).unwrap().collect();
//! assert_eq!(hits, vec![b"apple".as_slice()]);
//! ```

mod error;
mod eval;
mod view;

pub use error::QueryError;
pub use eval::{Matches, MetaMatches};
pub use view::{View, ViewIter};

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A boolean query over keys.
///
/// Built once, evaluated any number of times against any store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Literal(Vec<u8>),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Cluster(Box<Query>),
}

impl Query {
    pub fn literal(key: impl Into<Vec<u8>>) -> Self {
        Query::Literal(key.into())
    }

    /// Intersection of `children`. An empty conjunction matches nothing.
    pub fn and(children: impl IntoIterator<Item = Query>) -> Self {
        Query::And(children.into_iter().collect())
    }

    /// Union of `children`.
    pub fn or(children: impl IntoIterator<Item = Query>) -> Self {
        Query::Or(children.into_iter().collect())
    }

    pub fn not(child: Query) -> Self {
        Query::Not(Box::new(child))
    }

    pub fn cluster(child: Query) -> Self {
        Query::Cluster(Box::new(child))
    }

    /// Every key named by a leaf, left to right, repeats included.
    #[must_use]
    pub fn literals(&self) -> Vec<&[u8]> {
        let mut out = Vec::new();
        self.collect_literals(&mut out);
        out
    }

    fn collect_literals<'a>(&'a self, out: &mut Vec<&'a [u8]>) {
        match self {
            Query::Literal(key) => out.push(key),
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    child.collect_literals(out);
                }
            }
            Query::Not(child) | Query::Cluster(child) => child.collect_literals(out),
        }
    }

    /// The attribution units of a metaquery: the query's `And`/`Or` nodes
    /// are flattened and every other node is one unit.
    #[must_use]
    pub fn units(&self) -> Vec<&Query> {
        let mut out = Vec::new();
        self.collect_units(&mut out);
        out
    }

    fn collect_units<'a>(&'a self, out: &mut Vec<&'a Query>) {
        match self {
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    child.collect_units(out);
                }
            }
            _ => out.push(self),
        }
    }
}

impl BitAnd for Query {
    type Output = Query;

    /// `a & b & c` builds one flat `And`.
    fn bitand(self, rhs: Query) -> Query {
        match self {
            Query::And(mut children) => {
                children.push(rhs);
                Query::And(children)
            }
            lhs => Query::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Query {
    type Output = Query;

    /// `a | b | c` builds one flat `Or`.
    fn bitor(self, rhs: Query) -> Query {
        match self {
            Query::Or(mut children) => {
                children.push(rhs);
                Query::Or(children)
            }
            lhs => Query::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Query {
    type Output = Query;

    fn not(self) -> Query {
        Query::Not(Box::new(self))
    }
}

impl From<&str> for Query {
    fn from(key: &str) -> Self {
        Query::literal(key)
    }
}

impl From<&[u8]> for Query {
    fn from(key: &[u8]) -> Self {
        Query::literal(key)
    }
}

/// Text form: `a & (b | ~c)`, clusters in brackets. Non-UTF-8 key bytes are
/// replaced.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Literal(key) => write!(f, "{}", String::from_utf8_lossy(key)),
            Query::And(children) => write_joined(f, children, " & "),
            Query::Or(children) => write_joined(f, children, " | "),
            Query::Not(child) => {
                f.write_str("~")?;
                write_operand(f, child)
            }
            Query::Cluster(child) => write!(f, "[{}]", child),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Query], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write_operand(f, child)?;
    }
    Ok(())
}

fn write_operand(f: &mut fmt::Formatter<'_>, q: &Query) -> fmt::Result {
    match q {
        Query::And(children) | Query::Or(children) if children.len() > 1 => write!(f, "({})", q),
        _ => write!(f, "{}", q),
    }
}
