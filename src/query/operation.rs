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

//! Structured query representation
//!
//! Operations reference their arguments by parameter id; the values live in
//! a [`ParameterRegistry`](super::ParameterRegistry).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::pipeline::{Direction, SetOperationKind};

/// Parameter id, `"{position}-{verb}-{index}"`
pub type ParameterId = String;

/// Build the id of argument `index` of the call at `position`
pub fn parameter_id(position: usize, verb: &str, index: usize) -> ParameterId {
    format!("{position}-{verb}-{index}")
}

/// Split a parameter id into its verb and argument index
pub fn describe_parameter(id: &str) -> (&str, usize) {
    let mut parts = id.splitn(3, '-');
    let _position = parts.next();
    let verb = parts.next().unwrap_or(id);
    let index = parts.next().and_then(|index| index.parse().ok()).unwrap_or(0);
    (verb, index)
}

/// One sort key of an ordering operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderingParameters {
    /// Key selector
    pub function: ParameterId,
    /// Sort direction
    pub direction: Direction,
}

/// Matching strategy of a join operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinCondition {
    /// No condition: every pair matches
    Cross,
    /// Predicate over `(outerValue, innerValue, outerKey, innerKey)`
    On(ParameterId),
    /// Equal keys from an outer and an inner selector
    OnEquality {
        /// Outer key selector
        outer: ParameterId,
        /// Inner key selector
        inner: ParameterId,
    },
}

/// Join configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinParameters {
    /// Inner collection
    pub inner: ParameterId,
    /// Matching strategy
    pub condition: JoinCondition,
    /// `(value, key)` substituted for unmatched outer elements
    pub default: Option<(ParameterId, ParameterId)>,
    /// Result projection
    pub projection: ParameterId,
    /// Group join
    pub grouped: bool,
}

/// Sequence to sequence operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// `where(fn)`
    Where {
        /// Predicate
        predicate: ParameterId,
    },
    /// `select(fn)`
    Select {
        /// Value projection
        function: ParameterId,
    },
    /// `selectMany(fn)`
    SelectMany {
        /// Collection selector
        function: ParameterId,
    },
    /// `indexBy(fn)`
    IndexBy {
        /// Key projection
        function: ParameterId,
    },
    /// `keys()`
    Keys,
    /// `reindex()`
    Reindex,
    /// `orderBy*` followed by any `thenBy*`
    OrderBy {
        /// Sort keys, most significant first
        orderings: Vec<OrderingParameters>,
    },
    /// `groupBy(fn)`
    GroupBy {
        /// Group key selector
        function: ParameterId,
    },
    /// `join(..)` / `groupJoin(..)` with its sub-calls
    Join(JoinParameters),
    /// `unique()`
    Unique,
    /// `union`, `intersect`, `except`, `append`, `whereIn`, `whereNotIn`
    SetOperation {
        /// Operation
        kind: SetOperationKind,
        /// Comparison collection
        other: ParameterId,
    },
    /// `skip`, `take` and `slice`
    Range {
        /// Entries to skip
        start: Option<ParameterId>,
        /// Maximum entries to yield
        amount: Option<ParameterId>,
    },
}

impl Operation {
    /// Verb name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Self::Where { .. } => "where",
            Self::Select { .. } => "select",
            Self::SelectMany { .. } => "selectMany",
            Self::IndexBy { .. } => "indexBy",
            Self::Keys => "keys",
            Self::Reindex => "reindex",
            Self::OrderBy { .. } => "orderBy",
            Self::GroupBy { .. } => "groupBy",
            Self::Join(join) if join.grouped => "groupJoin",
            Self::Join(_) => "join",
            Self::Unique => "unique",
            Self::SetOperation { kind, .. } => kind.name(),
            Self::Range { .. } => "slice",
        }
    }

    /// Whether the stage needs every upstream entry before yielding
    pub fn needs_random_access(&self) -> bool {
        matches!(self, Self::OrderBy { .. } | Self::GroupBy { .. })
    }

    /// Parameter ids referenced by the operation, in argument order
    pub fn parameter_ids(&self) -> Vec<&ParameterId> {
        match self {
            Self::Where { predicate: id }
            | Self::Select { function: id }
            | Self::SelectMany { function: id }
            | Self::IndexBy { function: id }
            | Self::GroupBy { function: id }
            | Self::SetOperation { other: id, .. } => vec![id],
            Self::Keys | Self::Reindex | Self::Unique => Vec::new(),
            Self::OrderBy { orderings } => {
                orderings.iter().map(|ordering| &ordering.function).collect()
            }
            Self::Join(join) => {
                let mut ids = vec![&join.inner];
                match &join.condition {
                    JoinCondition::Cross => {}
                    JoinCondition::On(id) => ids.push(id),
                    JoinCondition::OnEquality { outer, inner } => ids.extend([outer, inner]),
                }
                if let Some((value, key)) = &join.default {
                    ids.extend([value, key]);
                }
                ids.push(&join.projection);
                ids
            }
            Self::Range { start, amount } => start.iter().chain(amount.iter()).collect(),
        }
    }
}

/// Terminal request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Request {
    /// The sequence as an array; later duplicate keys overwrite earlier ones
    AsArray,
    /// Every entry as a `[key, value]` pair, duplicates kept
    GetIterator,
    /// Number of entries
    Count,
    /// Whether there are no entries
    IsEmpty,
    /// First value or null
    First,
    /// Last value or null
    Last,
    /// Whether a value occurs
    Contains {
        /// Searched value
        value: ParameterId,
    },
    /// Value stored under a key or null
    OffsetGet {
        /// Key
        key: ParameterId,
    },
    /// Whether a key exists
    OffsetExists {
        /// Key
        key: ParameterId,
    },
    /// Aggregate request with an optional projection
    Aggregate {
        /// Aggregate kind
        kind: AggregateKind,
        /// Projection applied before aggregating
        function: Option<ParameterId>,
    },
    /// `implode(delimiter, fn?)`
    Implode {
        /// Delimiter
        delimiter: ParameterId,
        /// Projection applied before joining
        function: Option<ParameterId>,
    },
    /// `aggregate(fn)` left fold seeded with the first value
    Fold {
        /// Folding function `(accumulator, value)`
        function: ParameterId,
    },
}

/// Aggregates with an optional projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    /// `sum`
    Sum,
    /// `average`
    Average,
    /// `minimum`
    Minimum,
    /// `maximum`
    Maximum,
    /// `all`
    All,
    /// `any`
    Any,
}

impl AggregateKind {
    /// Verb name
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl Request {
    /// Verb name of the request
    pub fn name(&self) -> &'static str {
        match self {
            Self::AsArray => "asArray",
            Self::GetIterator => "getIterator",
            Self::Count => "count",
            Self::IsEmpty => "isEmpty",
            Self::First => "first",
            Self::Last => "last",
            Self::Contains { .. } => "contains",
            Self::OffsetGet { .. } => "offsetGet",
            Self::OffsetExists { .. } => "offsetExists",
            Self::Aggregate { kind, .. } => kind.name(),
            Self::Implode { .. } => "implode",
            Self::Fold { .. } => "aggregate",
        }
    }

    /// Whether the request looks entries up by key
    pub fn needs_random_access(&self) -> bool {
        matches!(self, Self::OffsetGet { .. } | Self::OffsetExists { .. })
    }

    /// Parameter ids referenced by the request
    pub fn parameter_ids(&self) -> Vec<&ParameterId> {
        match self {
            Self::Contains { value: id }
            | Self::OffsetGet { key: id }
            | Self::OffsetExists { key: id } => vec![id],
            Self::Aggregate { function, .. } => function.iter().collect(),
            Self::Implode {
                delimiter,
                function,
            } => std::iter::once(delimiter).chain(function.iter()).collect(),
            Self::Fold { function } => vec![function],
            _ => Vec::new(),
        }
    }
}

/// A parsed query: source placeholder, operations and the terminal request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Name of the variable the chain starts from
    pub source: String,
    /// Operations in call order
    pub operations: Vec<Operation>,
    /// Terminal request
    pub request: Request,
}

impl Query {
    /// Whether any stage or the request needs random access
    pub fn needs_random_access(&self) -> bool {
        self.request.needs_random_access()
            || self.operations.iter().any(Operation::needs_random_access)
    }

    /// Hash of the operation sequence shape
    ///
    /// Covers verbs, set operation kinds, join configuration and parameter
    /// ids, but not parameter values.
    pub fn shape_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.source)?;
        for operation in &self.operations {
            write!(f, "->{}(", operation.name())?;
            write_ids(f, &operation.parameter_ids())?;
            write!(f, ")")?;
        }
        write!(f, "->{}(", self.request.name())?;
        write_ids(f, &self.request.parameter_ids())?;
        write!(f, ")")
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, ids: &[&ParameterId]) -> fmt::Result {
    for (position, id) in ids.iter().enumerate() {
        if position > 0 {
            write!(f, ", ")?;
        }
        write!(f, ":{id}")?;
    }
    Ok(())
}
