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

//! Set algebra over value equality

use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::sequence::Sequence;
use super::stage::Pull;
use crate::error::Result;
use crate::model::{Entry, Value};

/// Set of values in first-insertion order
pub type ValueSet = IndexSet<Value, FxBuildHasher>;

/// Binary set operation against a second sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOperationKind {
    /// Distinct values of both sequences
    Union,
    /// Distinct values present in both
    Intersect,
    /// Distinct values absent from the other
    Except,
    /// Both sequences back to back, duplicates kept
    Append,
    /// Values present in the other, duplicates kept
    WhereIn,
    /// Values absent from the other, duplicates kept
    WhereNotIn,
}

impl SetOperationKind {
    /// Operation name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersect => "intersect",
            Self::Except => "except",
            Self::Append => "append",
            Self::WhereIn => "whereIn",
            Self::WhereNotIn => "whereNotIn",
        }
    }
}

impl fmt::Display for SetOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Materialize the values of a sequence into a comparison set
pub fn build_set(sequence: &Sequence, operation: &str) -> Result<ValueSet> {
    let mut set = ValueSet::default();
    for entry in sequence.iter() {
        let (_, value) = entry?;
        value.ensure_hashable(operation)?;
        set.insert(value);
    }
    Ok(set)
}

/// Keep only the first occurrence of each value
pub fn unique_pull(upstream: Pull, operation: &'static str) -> Pull {
    let mut seen = ValueSet::default();
    Box::new(upstream.filter_map(move |item| match item {
        Ok((key, value)) => match value.ensure_hashable(operation) {
            Ok(()) => seen.insert(value.clone()).then_some(Ok((key, value))),
            Err(err) => Some(Err(err)),
        },
        Err(err) => Some(Err(err)),
    }))
}

/// Re-key entries with a running counter
pub(crate) fn positional_pull(upstream: Pull) -> Pull {
    Box::new(
        upstream
            .enumerate()
            .map(|(position, item)| item.map(|(_, value)| (Value::from(position), value))),
    )
}

/// Build the pull chain of a set operation
///
/// Membership operations build the comparison set from `other` first, then
/// stream `base` in its own order. Union and append draw from two key spaces,
/// so their output is keyed by position.
pub fn set_operation_pull(
    base: &Sequence,
    kind: SetOperationKind,
    other: &Sequence,
) -> Result<Pull> {
    let pull: Pull = match kind {
        SetOperationKind::Append => positional_pull(Box::new(base.iter().chain(other.iter()))),
        SetOperationKind::Union => positional_pull(unique_pull(
            Box::new(base.iter().chain(other.iter())),
            "union",
        )),
        SetOperationKind::Intersect | SetOperationKind::WhereIn => {
            membership(base, build_set(other, kind.name())?, true, kind)
        }
        SetOperationKind::Except | SetOperationKind::WhereNotIn => {
            membership(base, build_set(other, kind.name())?, false, kind)
        }
    };
    Ok(pull)
}

fn membership(
    base: &Sequence,
    comparison: ValueSet,
    keep_members: bool,
    kind: SetOperationKind,
) -> Pull {
    let name = kind.name();
    let filtered: Pull = Box::new(base.iter().filter_map(move |item| match item {
        Ok((key, value)) => match value.ensure_hashable(name) {
            Ok(()) => (comparison.contains(&value) == keep_members).then_some(Ok((key, value))),
            Err(err) => Some(Err(err)),
        },
        Err(err) => Some(Err(err)),
    }));
    match kind {
        SetOperationKind::Intersect | SetOperationKind::Except => unique_pull(filtered, name),
        _ => filtered,
    }
}
