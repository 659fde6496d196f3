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

//! In-process query cache

use std::sync::Arc;

use dashmap::DashMap;

use super::QueryCache;
use crate::error::Result;
use crate::query::ResolvedQuery;

/// Query cache backed by a concurrent map of serialized entries
///
/// Entries are kept in their JSON form, the same representation an
/// out-of-process store would hold, so every hit goes through
/// deserialization.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is stored
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<ResolvedQuery>>> {
        match self.entries.get(key) {
            Some(json) => Ok(Some(Arc::new(ResolvedQuery::from_json(json.value())?))),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, query: Arc<ResolvedQuery>) -> Result<()> {
        self.entries.insert(key.to_string(), query.to_json()?);
        Ok(())
    }

    fn invalidate_namespace(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
