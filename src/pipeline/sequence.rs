// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deferred sequence of key/value entries
//!
//! A [`Sequence`] describes a chain of transformations without running any of
//! them. Work happens only when a [`StageIterator`] obtained from
//! [`Sequence::iter`] is pulled, and only as far as it is pulled.

use std::fmt;
use std::sync::Arc;

use super::Function;
use super::grouping::{build_groups, group_entries};
use super::join::{JoinSpec, join_pull};
use super::ordering::{Direction, OrderBy, sort_entries};
use super::range::RangeIterator;
use super::set_ops::{SetOperationKind, positional_pull, set_operation_pull, unique_pull};
use super::stage::{Pull, StageIterator};
use crate::error::{QueryError, Result};
use crate::model::{CollectionFactory, Entry, OrderedMap, Value};

/// Factory of fresh pull chains for generated sources
pub type Generator = Arc<dyn Fn() -> Pull + Send + Sync>;

/// How a projection stage rewrites entries
#[derive(Clone)]
pub enum Projection {
    /// Replace each value with `f(value, key)`, keeping keys
    Values(Function),
    /// Replace each key with `f(value, key)`, keeping values
    Keys(Function),
    /// Emit the keys as values under positional keys
    KeysAsValues,
    /// Keep values under positional keys
    Reindex,
}

/// Lazy sequence of entries
#[derive(Clone, Default)]
pub enum Sequence {
    /// No entries
    #[default]
    Empty,

    /// In-memory entries; duplicate keys are allowed
    Materialized(Arc<Vec<Entry>>),

    /// Source producing a fresh pull chain per iteration
    Generated(Generator),

    /// Entries whose `predicate(value, key)` is truthy
    Filter {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Inclusion test
        predicate: Function,
    },

    /// Rewritten keys or values
    Project {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Rewrite rule
        projection: Projection,
    },

    /// Entries of the collections returned by `function(value, key)`
    SelectMany {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Collection selector
        function: Function,
    },

    /// Stable multi-key sort
    Ordered {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Sort keys, most significant first
        orderings: Vec<OrderBy>,
    },

    /// Groups keyed by `key(value, key)`
    Grouped {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Group key selector
        key: Function,
        /// Builds each group collection
        factory: Arc<dyn CollectionFactory>,
    },

    /// Join or group join
    Join(Box<JoinSpec>),

    /// First occurrence of each value
    Unique {
        /// Upstream sequence
        base: Box<Sequence>,
    },

    /// Set algebra against a second sequence
    SetOperation {
        /// Primary sequence
        base: Box<Sequence>,
        /// Operation
        kind: SetOperationKind,
        /// Comparison sequence
        other: Box<Sequence>,
    },

    /// Positions `start..start + amount`
    Range {
        /// Upstream sequence
        base: Box<Sequence>,
        /// Entries to skip
        start: usize,
        /// Maximum entries to yield
        amount: Option<usize>,
    },

    /// Upstream materialized in full on the first pull
    Buffered {
        /// Upstream sequence
        base: Box<Sequence>,
    },
}

impl Sequence {
    /// Empty sequence
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Sequence of entries
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        if entries.is_empty() {
            return Self::Empty;
        }
        Self::Materialized(Arc::new(entries))
    }

    /// Sequence of values keyed `0..n`
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self::from_entries(
            values
                .into_iter()
                .enumerate()
                .map(|(position, value)| (Value::from(position), value))
                .collect(),
        )
    }

    /// Sequence over the entries of a map
    pub fn from_map(map: &OrderedMap) -> Self {
        Self::from_entries(map.iter().cloned().collect())
    }

    /// Sequence over an enumerable value
    ///
    /// Arrays yield their entries and objects their properties; anything else
    /// is not iterable.
    pub fn from_value(value: &Value, operation: &str) -> Result<Self> {
        value
            .as_entries()
            .map(Self::from_map)
            .ok_or_else(|| QueryError::invalid_iterable(operation, value.type_name()))
    }

    /// Sequence built by calling `generator` on every iteration
    pub fn generated<F>(generator: F) -> Self
    where
        F: Fn() -> Pull + Send + Sync + 'static,
    {
        Self::Generated(Arc::new(generator))
    }

    /// Keep entries whose `predicate(value, key)` is truthy
    pub fn filter(self, predicate: Function) -> Self {
        Self::Filter {
            base: Box::new(self),
            predicate,
        }
    }

    /// Map values through `f(value, key)`
    pub fn select(self, function: Function) -> Self {
        self.project(Projection::Values(function))
    }

    /// Re-key entries by `f(value, key)`
    pub fn index_by(self, function: Function) -> Self {
        self.project(Projection::Keys(function))
    }

    /// The keys as a list
    pub fn keys(self) -> Self {
        self.project(Projection::KeysAsValues)
    }

    /// The values as a list
    pub fn reindex(self) -> Self {
        self.project(Projection::Reindex)
    }

    fn project(self, projection: Projection) -> Self {
        Self::Project {
            base: Box::new(self),
            projection,
        }
    }

    /// Flatten the collections returned by `f(value, key)`
    pub fn select_many(self, function: Function) -> Self {
        Self::SelectMany {
            base: Box::new(self),
            function,
        }
    }

    /// Sort by `f(value, key)`
    pub fn order_by(self, function: Function, direction: Direction) -> Self {
        Self::Ordered {
            base: Box::new(self),
            orderings: vec![OrderBy::new(function, direction)],
        }
    }

    /// Add a secondary sort key to an ordered sequence
    pub fn then_by(self, function: Function, direction: Direction) -> Result<Self> {
        match self {
            Self::Ordered { base, mut orderings } => {
                orderings.push(OrderBy::new(function, direction));
                Ok(Self::Ordered { base, orderings })
            }
            _ => Err(QueryError::structural(
                "thenBy",
                "a secondary ordering must directly follow an ordering",
            )),
        }
    }

    /// Group by `key(value, key)`
    pub fn group_by(self, key: Function, factory: Arc<dyn CollectionFactory>) -> Self {
        Self::Grouped {
            base: Box::new(self),
            key,
            factory,
        }
    }

    /// Join against an inner sequence
    pub fn join(spec: JoinSpec) -> Self {
        Self::Join(Box::new(spec))
    }

    /// Distinct values
    pub fn unique(self) -> Self {
        Self::Unique {
            base: Box::new(self),
        }
    }

    /// Combine with `other` through a set operation
    pub fn set_operation(self, kind: SetOperationKind, other: Sequence) -> Self {
        Self::SetOperation {
            base: Box::new(self),
            kind,
            other: Box::new(other),
        }
    }

    /// Skip the first `count` entries
    pub fn skip(self, count: usize) -> Self {
        self.slice(count, None)
    }

    /// Keep at most the first `count` entries
    pub fn take(self, count: usize) -> Self {
        self.slice(0, Some(count))
    }

    /// Positions `start..start + amount`
    pub fn slice(self, start: usize, amount: Option<usize>) -> Self {
        if amount == Some(0) {
            return Self::Empty;
        }
        Self::Range {
            base: Box::new(self),
            start,
            amount,
        }
    }

    /// Materialize upstream in full on the first pull
    pub fn buffered(self) -> Self {
        match self {
            Self::Empty | Self::Materialized(_) | Self::Buffered { .. } => self,
            other => Self::Buffered {
                base: Box::new(other),
            },
        }
    }

    /// Whether any stage of the chain needs all upstream entries at once
    pub fn needs_random_access(&self) -> bool {
        match self {
            Self::Empty | Self::Materialized(_) | Self::Generated(_) => false,
            Self::Ordered { .. } | Self::Grouped { .. } | Self::Buffered { .. } => true,
            Self::Join(spec) => {
                spec.outer.needs_random_access() || spec.inner.needs_random_access()
            }
            Self::SetOperation { base, other, .. } => {
                base.needs_random_access() || other.needs_random_access()
            }
            Self::Filter { base, .. }
            | Self::Project { base, .. }
            | Self::SelectMany { base, .. }
            | Self::Unique { base }
            | Self::Range { base, .. } => base.needs_random_access(),
        }
    }

    /// Whether the chain ends after finitely many pulls
    ///
    /// Generated sources count as unbounded until a range with an amount caps
    /// them.
    pub fn is_bounded(&self) -> bool {
        match self {
            Self::Empty | Self::Materialized(_) => true,
            Self::Generated(_) => false,
            Self::Range {
                amount: Some(_), ..
            } => true,
            Self::Join(spec) => spec.outer.is_bounded(),
            Self::SetOperation {
                base,
                kind: SetOperationKind::Union | SetOperationKind::Append,
                other,
            } => base.is_bounded() && other.is_bounded(),
            Self::SetOperation { base, .. }
            | Self::Filter { base, .. }
            | Self::Project { base, .. }
            | Self::SelectMany { base, .. }
            | Self::Ordered { base, .. }
            | Self::Grouped { base, .. }
            | Self::Unique { base }
            | Self::Range { base, .. }
            | Self::Buffered { base } => base.is_bounded(),
        }
    }

    /// Name of the outermost stage
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Materialized(_) => "materialized",
            Self::Generated(_) => "generated",
            Self::Filter { .. } => "filter",
            Self::Project { .. } => "project",
            Self::SelectMany { .. } => "selectMany",
            Self::Ordered { .. } => "orderBy",
            Self::Grouped { .. } => "groupBy",
            Self::Join(spec) if spec.grouped => "groupJoin",
            Self::Join(_) => "join",
            Self::Unique { .. } => "unique",
            Self::SetOperation { kind, .. } => kind.name(),
            Self::Range { .. } => "range",
            Self::Buffered { .. } => "buffered",
        }
    }

    /// Start a new iteration
    pub fn iter(&self) -> StageIterator {
        StageIterator::new(self.clone())
    }

    /// Collect all entries, keeping duplicate keys
    pub fn to_entries(&self) -> Result<Vec<Entry>> {
        self.iter().collect()
    }

    /// Collect into a map; later entries overwrite earlier ones with equal keys
    pub fn to_map(&self) -> Result<OrderedMap> {
        let mut map = OrderedMap::new();
        for entry in self.iter() {
            let (key, value) = entry?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Collect the values in order
    pub fn to_values(&self) -> Result<Vec<Value>> {
        self.iter()
            .map(|entry| entry.map(|(_, value)| value))
            .collect()
    }

    /// Build the pull chain of this stage
    pub(crate) fn realize(self) -> Result<Pull> {
        let pull: Pull = match self {
            Self::Empty => Box::new(std::iter::empty()),
            Self::Materialized(entries) => {
                Box::new((0..entries.len()).map(move |position| Ok(entries[position].clone())))
            }
            Self::Generated(generator) => generator(),
            Self::Filter { base, predicate } => Box::new(base.iter().filter_map(move |item| {
                match item {
                    Ok((key, value)) => match predicate(&[value.clone(), key.clone()]) {
                        Ok(keep) if keep.is_truthy() => Some(Ok((key, value))),
                        Ok(_) => None,
                        Err(err) => Some(Err(err)),
                    },
                    Err(err) => Some(Err(err)),
                }
            })),
            Self::Project { base, projection } => project_pull(*base, projection),
            // Inner collections share key spaces, so flattened entries are re-keyed.
            Self::SelectMany { base, function } => {
                positional_pull(Box::new(base.iter().flat_map(move |item| {
                    let expanded = item.and_then(|(key, value)| {
                        let collection = function(&[value, key])?;
                        collection
                            .as_entries()
                            .map(|entries| entries.iter().cloned().collect::<Vec<_>>())
                            .ok_or_else(|| {
                                QueryError::invalid_iterable("selectMany", collection.type_name())
                            })
                    });
                    match expanded {
                        Ok(entries) => entries.into_iter().map(Ok).collect::<Vec<_>>(),
                        Err(err) => vec![Err(err)],
                    }
                })))
            }
            Self::Ordered { base, orderings } => {
                let sorted = sort_entries(base.to_entries()?, &orderings)?;
                Box::new(sorted.into_iter().map(Ok))
            }
            Self::Grouped { base, key, factory } => {
                let groups = group_entries(base.iter(), &key)?;
                Box::new(build_groups(groups, factory.as_ref()).into_iter().map(Ok))
            }
            Self::Join(spec) => join_pull(*spec)?,
            Self::Unique { base } => unique_pull(Box::new(base.iter()), "unique"),
            Self::SetOperation { base, kind, other } => set_operation_pull(&base, kind, &other)?,
            Self::Range {
                base,
                start,
                amount,
            } => Box::new(RangeIterator::new(Box::new(base.iter()), start, amount)),
            Self::Buffered { base } => Box::new(base.to_entries()?.into_iter().map(Ok)),
        };
        Ok(pull)
    }
}

fn project_pull(base: Sequence, projection: Projection) -> Pull {
    let upstream = base.iter();
    match projection {
        Projection::Values(function) => Box::new(upstream.map(move |item| {
            let (key, value) = item?;
            let projected = function(&[value, key.clone()])?;
            Ok((key, projected))
        })),
        Projection::Keys(function) => Box::new(upstream.map(move |item| {
            let (key, value) = item?;
            let new_key = function(&[value.clone(), key])?;
            Ok((new_key, value))
        })),
        Projection::KeysAsValues => Box::new(
            upstream
                .enumerate()
                .map(|(position, item)| item.map(|(key, _)| (Value::from(position), key))),
        ),
        Projection::Reindex => positional_pull(Box::new(upstream)),
    }
}

impl From<Vec<Entry>> for Sequence {
    fn from(entries: Vec<Entry>) -> Self {
        Self::from_entries(entries)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty | Self::Generated(_) => write!(f, "{}", self.stage_name()),
            Self::Materialized(entries) => write!(f, "materialized({})", entries.len()),
            Self::Join(spec) => {
                write!(f, "{}({:?}, {:?})", self.stage_name(), spec.outer, spec.inner)
            }
            Self::SetOperation { base, other, .. } => {
                write!(f, "{}({:?}, {:?})", self.stage_name(), base, other)
            }
            Self::Filter { base, .. }
            | Self::Project { base, .. }
            | Self::SelectMany { base, .. }
            | Self::Ordered { base, .. }
            | Self::Grouped { base, .. }
            | Self::Unique { base }
            | Self::Range { base, .. }
            | Self::Buffered { base } => write!(f, "{}({:?})", self.stage_name(), base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArrayFactory;
    use crate::pipeline::function;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ints(items: &[i64]) -> Sequence {
        Sequence::from_values(items.iter().copied().map(Value::Int))
    }

    fn int_values(sequence: &Sequence) -> Vec<i64> {
        sequence
            .to_values()
            .unwrap()
            .into_iter()
            .filter_map(|value| value.as_int())
            .collect()
    }

    #[test]
    fn test_filter_preserves_keys() {
        let odd = ints(&[1, 2, 3, 4]).filter(function(|args| {
            Ok(Value::Bool(args[0].as_int().unwrap_or(0) % 2 == 1))
        }));
        assert_eq!(
            odd.to_entries().unwrap(),
            vec![(Value::Int(0), Value::Int(1)), (Value::Int(2), Value::Int(3))]
        );
    }

    #[test]
    fn test_projections() {
        let source = Sequence::from_entries(vec![
            (Value::string("a"), Value::Int(1)),
            (Value::string("b"), Value::Int(2)),
        ]);
        let doubled = source
            .clone()
            .select(function(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))));
        assert_eq!(doubled.to_entries().unwrap()[1], (Value::string("b"), Value::Int(4)));

        assert_eq!(
            source.clone().keys().to_values().unwrap(),
            vec![Value::string("a"), Value::string("b")]
        );
        assert_eq!(source.clone().reindex().to_entries().unwrap()[1].0, Value::Int(1));

        let by_value = source.index_by(function(|args| Ok(args[0].clone())));
        assert_eq!(by_value.to_entries().unwrap()[0].0, Value::Int(1));
    }

    #[test]
    fn test_select_many_requires_collections() {
        let pairs = ints(&[1, 2]).select_many(function(|args| {
            Ok(Value::list([args[0].clone(), args[0].clone()]))
        }));
        assert_eq!(int_values(&pairs), vec![1, 1, 2, 2]);
        let keys: Vec<Value> = pairs.to_entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..4).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(pairs.to_map().unwrap().len(), 4);

        let scalars = ints(&[1]).select_many(function(|args| Ok(args[0].clone())));
        assert!(matches!(
            scalars.to_entries().unwrap_err(),
            QueryError::InvalidIterable { .. }
        ));
    }

    #[test]
    fn test_order_by_is_stable() {
        let rows = Sequence::from_values([
            Value::list([Value::Int(1), Value::string("A")]),
            Value::list([Value::Int(1), Value::string("B")]),
        ]);
        let first = function(|args| {
            Ok(args[0]
                .as_array()
                .and_then(|row| row.get(&Value::Int(0)))
                .cloned()
                .unwrap_or_default())
        });
        let ordered = rows.order_by(first, Direction::Ascending);
        let labels: Vec<Value> = ordered
            .to_values()
            .unwrap()
            .iter()
            .filter_map(|row| row.as_array().and_then(|row| row.get(&Value::Int(1))).cloned())
            .collect();
        assert_eq!(labels, vec![Value::string("A"), Value::string("B")]);
    }

    #[test]
    fn test_then_by_requires_ordering() {
        let identity = function(|args| Ok(args[0].clone()));
        assert!(ints(&[1]).then_by(identity.clone(), Direction::Ascending).is_err());

        let ordered = ints(&[3, 1, 2])
            .order_by(function(|_| Ok(Value::Int(0))), Direction::Ascending)
            .then_by(identity, Direction::Descending)
            .unwrap();
        assert_eq!(int_values(&ordered), vec![3, 2, 1]);
    }

    #[test]
    fn test_group_by_output_keys() {
        let grouped = ints(&[1, 2, 3]).group_by(
            function(|args| Ok(Value::Bool(args[0].as_int().unwrap_or(0) % 2 == 0))),
            Arc::new(ArrayFactory),
        );
        let keys: Vec<Value> = grouped.to_entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Value::Bool(false), Value::Bool(true)]);
    }

    #[test]
    fn test_take_over_unbounded_generator() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let naturals = Sequence::generated(move || -> Pull {
            let counter = counter.clone();
            Box::new((0..).map(move |n: i64| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok((Value::Int(n), Value::Int(n)))
            }))
        });
        let first_three = naturals.take(3);
        assert_eq!(int_values(&first_three), vec![0, 1, 2]);
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_boundedness() {
        let naturals = Sequence::generated(|| -> Pull {
            Box::new((0..).map(|n: i64| Ok((Value::Int(n), Value::Int(n)))))
        });
        let identity = function(|args| Ok(args[0].clone()));
        assert!(ints(&[1]).filter(identity.clone()).is_bounded());
        assert!(!naturals.clone().filter(identity.clone()).is_bounded());
        assert!(!naturals.clone().skip(2).is_bounded());
        assert!(naturals.clone().take(2).select(identity).is_bounded());
        assert!(!ints(&[1]).set_operation(SetOperationKind::Append, naturals.clone()).is_bounded());
        assert!(naturals.take(1).set_operation(SetOperationKind::Except, ints(&[1])).is_bounded());
    }

    #[test]
    fn test_nothing_runs_before_pulling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mapped = ints(&[1, 2, 3]).select(function(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args[0].clone())
        }));
        let mut stage = mapped.iter();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        stage.next();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_skip_and_slice() {
        assert_eq!(int_values(&ints(&[1, 2, 3, 4]).skip(2)), vec![3, 4]);
        assert_eq!(int_values(&ints(&[1, 2, 3, 4]).slice(1, Some(2))), vec![2, 3]);
        assert!(ints(&[1, 2]).take(0).to_entries().unwrap().is_empty());
    }

    #[test]
    fn test_random_access_detection() {
        let identity = function(|args| Ok(args[0].clone()));
        assert!(!ints(&[1]).filter(identity.clone()).needs_random_access());
        assert!(
            ints(&[1])
                .order_by(identity.clone(), Direction::Ascending)
                .take(1)
                .needs_random_access()
        );
    }

    #[test]
    fn test_from_value_rejects_scalars() {
        let err = Sequence::from_value(&Value::Int(1), "from").unwrap_err();
        assert!(matches!(err, QueryError::InvalidIterable { .. }));
        assert_eq!(
            Sequence::from_value(&Value::list([Value::Int(5)]), "from")
                .unwrap()
                .to_values()
                .unwrap(),
            vec![Value::Int(5)]
        );
    }
}
