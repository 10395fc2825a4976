//! Lazy evaluation of a [`Query`] against a [`Store`].
//!
//! A query is planned into a tree of [`Node`]s, one per query node. Planning
//! only looks keys up; values are pulled when the caller pulls.
//!
//! - `Literal` streams the key's value block, filtered by the view.
//! - `Or` streams each child in turn, skipping values already yielded.
//! - `And` is a blocking operator: on the first pull it collects the first
//!   child, then narrows that running set with each later child, stopping
//!   as soon as it is empty.
//! - `Not` collects its child on the first pull and then streams the domain
//!   minus that set.

use rustc_hash::FxHashSet;
use std::vec;
use store::{Store, UniqueValues, ValueIter};

use crate::error::QueryError;
use crate::view::{View, ViewIter};
use crate::Query;

impl Query {
    /// Evaluates the query against `store`, restricted to `view` if given.
    ///
    /// Values are yielded at most once each, except under a bare `Literal`
    /// on a store built without value dedup.
    ///
    /// # Errors
    ///
    /// [`QueryError::ViewMismatch`] if `view` was built from another store.
    pub fn evaluate<'a>(
        &'a self,
        store: &'a Store,
        view: Option<&'a View>,
    ) -> Result<Matches<'a>, QueryError> {
        check_view(store, view)?;
        tracing::debug!(query = %self, restricted = view.is_some(), "evaluating query");
        Ok(Matches {
            node: Node::plan(self, store, view),
        })
    }

    /// Evaluates the query and attributes every matching value to the
    /// units (see [`Query::units`]) that produced it.
    ///
    /// Units are visited left to right. For each unit, yields `(unit, value)`
    /// for every distinct value of that unit that is also in the result of
    /// the whole query. A value produced by several units is yielded once per
    /// unit.
    ///
    /// When an `And` sits between the root and its units, the whole result is
    /// collected into memory on the first pull and each unit is read again to
    /// attribute it. A query made only of `Or` nodes over its units needs no
    /// such filter and streams each unit directly.
    ///
    /// # Errors
    ///
    /// [`QueryError::ViewMismatch`] if `view` was built from another store.
    pub fn metaquery<'a>(
        &'a self,
        store: &'a Store,
        view: Option<&'a View>,
    ) -> Result<MetaMatches<'a>, QueryError> {
        check_view(store, view)?;
        tracing::debug!(query = %self, restricted = view.is_some(), "evaluating metaquery");
        Ok(MetaMatches {
            query: self,
            store,
            view,
            units: self.units().into_iter(),
            filtered: narrows_units(self),
            whole: None,
            current: None,
        })
    }
}

/// Whether a unit may yield values outside the whole result. Only an `And`
/// on the path from the root to the units can narrow them.
pub(crate) fn narrows_units(query: &Query) -> bool {
    match query {
        Query::And(_) => true,
        Query::Or(children) => children.iter().any(narrows_units),
        _ => false,
    }
}

fn check_view(store: &Store, view: Option<&View>) -> Result<(), QueryError> {
    match view {
        Some(view) if !view.is_bound_to(store) => Err(QueryError::ViewMismatch {
            expected: view.store_id(),
            found: store.id(),
        }),
        _ => Ok(()),
    }
}

/// Lazy iterator over the values matching a query.
pub struct Matches<'a> {
    node: Node<'a>,
}

impl<'a> Iterator for Matches<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.node.next()
    }
}

/// Lazy iterator over `(unit, value)` attributions of a query.
pub struct MetaMatches<'a> {
    query: &'a Query,
    store: &'a Store,
    view: Option<&'a View>,
    units: vec::IntoIter<&'a Query>,
    /// Units must be checked against the whole result.
    filtered: bool,
    /// Result of the whole query, collected on the first pull when
    /// `filtered`.
    whole: Option<FxHashSet<&'a [u8]>>,
    current: Option<Attribution<'a>>,
}

struct Attribution<'a> {
    unit: &'a Query,
    node: Node<'a>,
    seen: FxHashSet<&'a [u8]>,
}

impl<'a> Iterator for MetaMatches<'a> {
    type Item = (&'a Query, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (query, store, view) = (self.query, self.store, self.view);
        if self.filtered && self.whole.is_none() {
            self.whole = Some(Node::plan(query, store, view).collect());
        }
        let whole = self.whole.as_ref();
        if matches!(whole, Some(w) if w.is_empty()) {
            return None;
        }
        loop {
            if let Some(current) = &mut self.current {
                let seen = &mut current.seen;
                if let Some(v) = current
                    .node
                    .find(|v| whole.map_or(true, |w| w.contains(v)) && seen.insert(*v))
                {
                    return Some((current.unit, v));
                }
            }
            let unit = self.units.next()?;
            self.current = Some(Attribution {
                unit,
                node: Node::plan(unit, store, view),
                seen: FxHashSet::default(),
            });
        }
    }
}

/// One planned query node.
enum Node<'a> {
    Empty,
    Literal {
        values: ValueIter<'a>,
        view: Option<&'a View>,
    },
    Or(Union<'a>),
    And(Box<Intersection<'a>>),
    Not(Box<Difference<'a>>),
}

impl<'a> Node<'a> {
    fn plan(query: &'a Query, store: &'a Store, view: Option<&'a View>) -> Self {
        match query {
            Query::Literal(key) => Node::Literal {
                values: store.get(key).iter(),
                view,
            },
            Query::Cluster(child) => Node::plan(child, store, view),
            Query::Or(children) => Node::Or(Union {
                children: children
                    .iter()
                    .map(|c| Node::plan(c, store, view))
                    .collect(),
                current: 0,
                seen: FxHashSet::default(),
            }),
            Query::And(children) => {
                // One absent key empties the whole conjunction.
                let absent = children
                    .iter()
                    .any(|c| matches!(c, Query::Literal(key) if !store.contains(key)));
                if children.is_empty() || absent {
                    return Node::Empty;
                }
                Node::And(Box::new(Intersection::Pending(
                    children
                        .iter()
                        .map(|c| Node::plan(c, store, view))
                        .collect(),
                )))
            }
            Query::Not(child) => Node::Not(Box::new(Difference {
                domain: match view {
                    Some(view) => Domain::View(view.iter()),
                    None => Domain::Store(store.unique_values()),
                },
                child: Some(Node::plan(child, store, view)),
                excluded: FxHashSet::default(),
            })),
        }
    }
}

impl<'a> Iterator for Node<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Node::Empty => None,
            Node::Literal { values, view } => match view {
                Some(view) => values.find(|v| view.contains(v)),
                None => values.next(),
            },
            Node::Or(union) => union.next(),
            Node::And(intersection) => intersection.next(),
            Node::Not(difference) => difference.next(),
        }
    }
}

struct Union<'a> {
    children: Vec<Node<'a>>,
    current: usize,
    seen: FxHashSet<&'a [u8]>,
}

impl<'a> Union<'a> {
    fn next(&mut self) -> Option<&'a [u8]> {
        while let Some(child) = self.children.get_mut(self.current) {
            let seen = &mut self.seen;
            if let Some(v) = child.find(|v| seen.insert(*v)) {
                return Some(v);
            }
            self.current += 1;
        }
        None
    }
}

enum Intersection<'a> {
    Pending(Vec<Node<'a>>),
    Ready(vec::IntoIter<&'a [u8]>),
}

impl<'a> Intersection<'a> {
    fn next(&mut self) -> Option<&'a [u8]> {
        if let Intersection::Pending(children) = self {
            let values = intersect(std::mem::take(children));
            *self = Intersection::Ready(values.into_iter());
        }
        match self {
            Intersection::Ready(values) => values.next(),
            Intersection::Pending(_) => None,
        }
    }
}

/// Intersects children left to right, keeping the first child's order.
fn intersect<'a>(children: Vec<Node<'a>>) -> Vec<&'a [u8]> {
    let mut children = children.into_iter();
    let first = match children.next() {
        Some(first) => first,
        None => return Vec::new(),
    };
    let mut members: FxHashSet<&'a [u8]> = FxHashSet::default();
    let mut running: Vec<&'a [u8]> = first.filter(|v| members.insert(*v)).collect();

    for child in children {
        if running.is_empty() {
            break;
        }
        let mut hit: FxHashSet<&'a [u8]> = FxHashSet::default();
        for v in child {
            if members.contains(v) {
                hit.insert(v);
                if hit.len() == members.len() {
                    break;
                }
            }
        }
        running.retain(|v| hit.contains(v));
        members = hit;
    }
    running
}

struct Difference<'a> {
    domain: Domain<'a>,
    /// Taken and collected into `excluded` on the first pull.
    child: Option<Node<'a>>,
    excluded: FxHashSet<&'a [u8]>,
}

impl<'a> Difference<'a> {
    fn next(&mut self) -> Option<&'a [u8]> {
        if let Some(child) = self.child.take() {
            self.excluded = child.collect();
        }
        let excluded = &self.excluded;
        self.domain.find(|v| !excluded.contains(v))
    }
}

/// Closed-world value domain for `Not`.
enum Domain<'a> {
    View(ViewIter<'a>),
    Store(UniqueValues<'a>),
}

impl<'a> Iterator for Domain<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Domain::View(values) => values.next(),
            Domain::Store(values) => values.next(),
        }
    }
}
