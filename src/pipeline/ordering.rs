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

//! Stable multi-key ordering

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::Function;
use crate::error::{QueryError, Result};
use crate::model::{Entry, Value};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest key first
    Ascending,
    /// Largest key first
    Descending,
}

impl Direction {
    /// Direction from a boolean flag
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending { Self::Ascending } else { Self::Descending }
    }

    /// Parse a direction constant
    ///
    /// Accepts `true`, `"asc"`, `"ascending"` and `1` for ascending and their
    /// counterparts `false`, `"desc"`, `"descending"` and `-1` for descending.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(ascending) => Ok(Self::from_ascending(*ascending)),
            Value::Int(1) => Ok(Self::Ascending),
            Value::Int(-1) => Ok(Self::Descending),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "asc" | "ascending" => Ok(Self::Ascending),
                "desc" | "descending" => Ok(Self::Descending),
                _ => Err(invalid_direction(value)),
            },
            _ => Err(invalid_direction(value)),
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

fn invalid_direction(value: &Value) -> QueryError {
    QueryError::type_mismatch(
        "ordering direction",
        value.describe(),
        Some("expected true/false, 'asc'/'desc' or 1/-1".to_string()),
    )
}

/// One sort key: a key function `(value, key) -> sort key` plus its direction
#[derive(Clone)]
pub struct OrderBy {
    /// Key selector
    pub function: Function,
    /// Sort direction
    pub direction: Direction,
}

impl OrderBy {
    /// Create a sort key
    pub fn new(function: Function, direction: Direction) -> Self {
        Self {
            function,
            direction,
        }
    }
}

impl fmt::Debug for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBy")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// Sort entries by the given keys, keeping the relative order of ties
///
/// Sort keys are computed once per entry. The first incomparable pair aborts
/// the sort with `IncomparableKey`.
pub fn sort_entries(entries: Vec<Entry>, orderings: &[OrderBy]) -> Result<Vec<Entry>> {
    let mut keyed = entries
        .into_iter()
        .map(|(key, value)| {
            let sort_keys = orderings
                .iter()
                .map(|ordering| (ordering.function)(&[value.clone(), key.clone()]))
                .collect::<Result<Vec<_>>>()?;
            Ok((sort_keys, (key, value)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut failure = None;
    keyed.sort_by(|(left, _), (right, _)| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        for ((a, b), ordering) in left.iter().zip(right).zip(orderings) {
            match a.compare(b, "orderBy") {
                Ok(Ordering::Equal) => continue,
                Ok(unequal) => return ordering.direction.apply(unequal),
                Err(err) => {
                    failure = Some(err);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(keyed.into_iter().map(|(_, entry)| entry).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderedMap;
    use crate::pipeline::function;
    use pretty_assertions::assert_eq;

    fn by_value(direction: Direction) -> OrderBy {
        OrderBy::new(function(|args| Ok(args[0].clone())), direction)
    }

    fn field(name: &'static str, direction: Direction) -> OrderBy {
        OrderBy::new(
            function(move |args| {
                Ok(args[0]
                    .as_array()
                    .and_then(|row| row.get(&Value::string(name)))
                    .cloned()
                    .unwrap_or_default())
            }),
            direction,
        )
    }

    fn row(rank: i64, label: &str) -> Value {
        Value::array(OrderedMap::from_entries([
            (Value::string("rank"), Value::Int(rank)),
            (Value::string("label"), Value::string(label)),
        ]))
    }

    #[test]
    fn test_ties_keep_prior_order() {
        let entries = vec![
            (0.into(), row(1, "A")),
            (1.into(), row(0, "C")),
            (2.into(), row(1, "B")),
        ];
        let sorted = sort_entries(entries, &[field("rank", Direction::Ascending)]).unwrap();
        let keys: Vec<Value> = sorted.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1.into(), 0.into(), 2.into()]);
    }

    #[test]
    fn test_secondary_key() {
        let entries = vec![
            (0.into(), row(1, "A")),
            (1.into(), row(0, "C")),
            (2.into(), row(1, "B")),
        ];
        let sorted = sort_entries(
            entries,
            &[field("rank", Direction::Descending), field("label", Direction::Descending)],
        )
        .unwrap();
        let keys: Vec<Value> = sorted.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2.into(), 0.into(), 1.into()]);
    }

    #[test]
    fn test_incomparable_keys_fail() {
        let entries = vec![(0.into(), 1.into()), (1.into(), "x".into())];
        let err = sort_entries(entries, &[by_value(Direction::Ascending)]).unwrap_err();
        assert!(matches!(err, QueryError::IncomparableKey { .. }));
    }

    #[test]
    fn test_direction_constants() {
        assert_eq!(Direction::from_value(&"DESC".into()).unwrap(), Direction::Descending);
        assert_eq!(Direction::from_value(&Value::Int(1)).unwrap(), Direction::Ascending);
        assert_eq!(Direction::from_value(&false.into()).unwrap(), Direction::Descending);
        assert!(Direction::from_value(&"sideways".into()).is_err());
    }
}
