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

//! Insertion-ordered map with arbitrary value keys

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use super::value::{Entry, Value};

/// Insertion-ordered key/value map
///
/// Keys are unique: inserting an existing key replaces the value in place and
/// keeps the key's original position. Keys may be any value, not only
/// integers and strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Entry>", into = "Vec<Entry>")]
pub struct OrderedMap {
    entries: Vec<Entry>,
    index: FxHashMap<Value, usize>,
}

impl OrderedMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Create a list-like map keyed 0..n
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self::from_entries(
            values
                .into_iter()
                .enumerate()
                .map(|(position, value)| (Value::from(position), value)),
        )
    }

    /// Create a map from entries; later duplicates overwrite earlier values
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut map = Self::new();
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }

    /// Insert a value, returning the previous value for the key
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        match self.index.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Append a value under the next free integer key
    pub fn push(&mut self, value: Value) {
        let key = Value::Int(self.next_index());
        self.insert(key, value);
    }

    /// Next integer key: one past the largest integer key, or 0
    pub fn next_index(&self) -> i64 {
        self.entries
            .iter()
            .filter_map(|(key, _)| key.as_int())
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    /// Get the value stored under a key
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(key)
    }

    /// Remove a key, shifting later entries down
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether the keys are exactly 0..n in order
    pub fn is_list(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(position, (key, _))| key.as_int() == Some(position as i64))
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Iterate over keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Iterate over values in insertion order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Entry at a position
    pub fn get_index(&self, position: usize) -> Option<&Entry> {
        self.entries.get(position)
    }

    /// Take ownership of the entries
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

impl PartialEq for OrderedMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for OrderedMap {}

impl Hash for OrderedMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entries.hash(state);
    }
}

impl From<Vec<Entry>> for OrderedMap {
    fn from(entries: Vec<Entry>) -> Self {
        Self::from_entries(entries)
    }
}

impl From<OrderedMap> for Vec<Entry> {
    fn from(map: OrderedMap) -> Self {
        map.entries
    }
}

impl FromIterator<Entry> for OrderedMap {
    fn from_iter<T: IntoIterator<Item = Entry>>(iter: T) -> Self {
        Self::from_entries(iter)
    }
}

impl<'a> IntoIterator for &'a OrderedMap {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_original_position() {
        let mut map = OrderedMap::new();
        map.insert("a".into(), 1.into());
        map.insert("b".into(), 2.into());
        let previous = map.insert("a".into(), 3.into());

        assert_eq!(previous, Some(Value::Int(1)));
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(map.get(&"a".into()), Some(&Value::Int(3)));
    }

    #[test]
    fn test_push_uses_next_integer_key() {
        let mut map = OrderedMap::new();
        map.insert(Value::Int(5), "x".into());
        map.insert("k".into(), "y".into());
        map.push("z".into());

        assert_eq!(map.get(&Value::Int(6)), Some(&Value::from("z")));
        assert!(!map.is_list());
    }

    #[test]
    fn test_remove_reindexes_positions() {
        let mut map = OrderedMap::from_values([1.into(), 2.into(), 3.into()]);
        assert_eq!(map.remove(&Value::Int(0)), Some(Value::Int(1)));
        assert_eq!(map.get(&Value::Int(2)), Some(&Value::Int(3)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_non_scalar_keys() {
        let key = Value::list([1.into(), "a".into()]);
        let mut map = OrderedMap::new();
        map.insert(key.clone(), true.into());
        assert!(map.contains_key(&Value::list([1.into(), "a".into()])));
    }

    #[test]
    fn test_serde_rebuilds_index() {
        let map = OrderedMap::from_values(["a".into(), "b".into()]);
        let json = serde_json::to_string(&map).unwrap();
        let back: OrderedMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.get(&Value::Int(1)), Some(&Value::from("b")));
    }
}
