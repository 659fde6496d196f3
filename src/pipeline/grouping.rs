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

//! Equality-keyed grouping

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use super::Function;
use crate::error::Result;
use crate::model::{CollectionFactory, Entry, Value};

/// Group table keyed by group key in first-seen order
pub type GroupTable = IndexMap<Value, Vec<Entry>, FxBuildHasher>;

/// Partition entries into groups in a single pass
///
/// Each group keeps the original `(key, value)` pairs in their relative order.
pub fn group_entries(
    entries: impl IntoIterator<Item = Result<Entry>>,
    key_function: &Function,
) -> Result<GroupTable> {
    let mut groups = GroupTable::default();
    for entry in entries {
        let (key, value) = entry?;
        let group_key = key_function(&[value.clone(), key.clone()])?;
        group_key.ensure_hashable("groupBy")?;
        groups.entry(group_key).or_default().push((key, value));
    }
    Ok(groups)
}

/// Turn a group table into output entries `group key => group collection`
pub fn build_groups(groups: GroupTable, factory: &dyn CollectionFactory) -> Vec<Entry> {
    groups
        .into_iter()
        .map(|(group_key, members)| (group_key, factory.construct_like(members)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::model::{ArrayFactory, OrderedMap};
    use crate::pipeline::function;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_group_by_parity() {
        let entries = (1..=10).map(|n| Ok((Value::Int(n - 1), Value::Int(n))));
        let parity = function(|args| Ok(Value::Bool(args[0].as_int().unwrap_or(0) % 2 == 0)));
        let groups = build_groups(group_entries(entries, &parity).unwrap(), &ArrayFactory);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Value::Bool(false));
        let odd: Vec<Value> = groups[0].1.as_array().unwrap().values().cloned().collect();
        assert_eq!(odd, [1, 3, 5, 7, 9].map(Value::Int).to_vec());
        let even = groups[1].1.as_array().unwrap();
        assert_eq!(
            even.keys().cloned().collect::<Vec<_>>(),
            [1, 3, 5, 7, 9].map(Value::Int).to_vec()
        );
    }

    #[test]
    fn test_composite_keys_group_by_value() {
        let entries = ["a", "b", "a"].into_iter().enumerate().map(|(i, s)| {
            Ok((Value::from(i), Value::string(s)))
        });
        let composite = function(|args| {
            Ok(Value::array(OrderedMap::from_values([args[0].clone(), Value::Int(1)])))
        });
        let groups = group_entries(entries, &composite).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_nan_group_key_fails() {
        let entries = [Ok((Value::Int(0), Value::Int(1)))];
        let nan = function(|_| Ok(Value::Float(f64::NAN)));
        let err = group_entries(entries, &nan).unwrap_err();
        assert!(matches!(err, QueryError::IncomparableKey { .. }));
    }
}
