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

//! Function interpreter with a memoizing structure cache

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use super::reflection::{FunctionLocation, FunctionReflection};
use super::structure::FunctionStructure;
use crate::error::{QueryError, Result};
use crate::evaluator::{Callable, EvaluationContext};

/// Source front-end turning a reflected callable into its structure
pub trait FunctionParser: Send + Sync {
    /// Parse the callable described by `reflection`
    fn parse(&self, reflection: &FunctionReflection) -> Result<FunctionStructure>;
}

/// Parser backed by a table of structures built ahead of time
#[derive(Debug, Default)]
pub struct PreparsedFunctions {
    structures: FxHashMap<FunctionLocation, FunctionStructure>,
}

impl PreparsedFunctions {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the structure defined at `location`
    pub fn register(&mut self, location: FunctionLocation, structure: FunctionStructure) {
        self.structures.insert(location, structure);
    }
}

impl FunctionParser for PreparsedFunctions {
    fn parse(&self, reflection: &FunctionReflection) -> Result<FunctionStructure> {
        self.structures
            .get(&reflection.location)
            .cloned()
            .ok_or_else(|| {
                QueryError::structural(
                    "FunctionStructure",
                    format!(
                        "no function defined at {}:{}",
                        reflection.location.file_path, reflection.location.start_line
                    ),
                )
            })
    }
}

/// Content-addressed cache of parsed structures
///
/// Readers never block; concurrent misses may parse twice, and the first
/// installed entry wins.
#[derive(Debug, Default)]
pub struct FunctionCache {
    entries: DashMap<String, Arc<FunctionStructure>>,
}

impl FunctionCache {
    /// Create an empty cache
    pub fn init() -> Self {
        log::debug!("function structure cache initialized");
        Self::default()
    }

    /// Get a cached structure
    pub fn get(&self, global_hash: &str) -> Option<Arc<FunctionStructure>> {
        self.entries.get(global_hash).map(|entry| entry.value().clone())
    }

    /// Install a structure unless one is already cached; returns the cached one
    pub fn install(
        &self,
        global_hash: String,
        structure: Arc<FunctionStructure>,
    ) -> Arc<FunctionStructure> {
        self.entries.entry(global_hash).or_insert(structure).value().clone()
    }

    /// Number of cached structures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached structure
    pub fn clear(&self) {
        log::debug!("clearing {} cached function structures", self.entries.len());
        self.entries.clear();
    }
}

/// Resolves reflected callables to memoized structures
#[derive(Clone)]
pub struct FunctionInterpreter {
    parser: Arc<dyn FunctionParser>,
    cache: Arc<FunctionCache>,
}

impl fmt::Debug for FunctionInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionInterpreter")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl FunctionInterpreter {
    /// Create an interpreter over a parser and an injected cache
    pub fn new(parser: Arc<dyn FunctionParser>, cache: Arc<FunctionCache>) -> Self {
        Self { parser, cache }
    }

    /// The structure cache
    pub fn cache(&self) -> &Arc<FunctionCache> {
        &self.cache
    }

    /// Get the structure of a reflected callable, parsing on first use
    pub fn structure(&self, reflection: &FunctionReflection) -> Result<Arc<FunctionStructure>> {
        let global_hash = reflection.global_hash();
        if let Some(structure) = self.cache.get(&global_hash) {
            log::trace!("function structure cache hit for {global_hash}");
            return Ok(structure);
        }

        log::debug!(
            "parsing function at {}:{}-{}",
            reflection.location.file_path,
            reflection.location.start_line,
            reflection.location.end_line
        );
        let structure = Arc::new(self.parser.parse(reflection)?);
        Ok(self.cache.install(global_hash, structure))
    }

    /// Build a runtime callable for a reflected function bound to `scope`
    pub fn callable(
        &self,
        reflection: &FunctionReflection,
        scope: Arc<EvaluationContext>,
    ) -> Result<Callable> {
        let structure = self.structure(reflection)?;
        Callable::closure(structure.to_closure(), scope)
    }
}
