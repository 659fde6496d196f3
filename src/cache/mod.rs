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

//! Resolved query cache
//!
//! The engine talks to its cache through [`QueryCache`]. Values are pure
//! functions of their keys, so a failed or lost write only costs a
//! recomputation.

pub mod config;
pub mod memory;

pub use config::CacheConfig;
pub use memory::MemoryCache;

use std::sync::Arc;

use crate::error::Result;
use crate::query::ResolvedQuery;

/// Storage for resolved queries keyed by namespaced structural hash
pub trait QueryCache: Send + Sync {
    /// Look a resolved query up
    fn get(&self, key: &str) -> Result<Option<Arc<ResolvedQuery>>>;

    /// Store a resolved query
    fn put(&self, key: &str, query: Arc<ResolvedQuery>) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`
    fn invalidate_namespace(&self, prefix: &str) -> Result<()>;
}

/// Cache that never stores anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl QueryCache for NullCache {
    fn get(&self, _key: &str) -> Result<Option<Arc<ResolvedQuery>>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _query: Arc<ResolvedQuery>) -> Result<()> {
        Ok(())
    }

    fn invalidate_namespace(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }
}
