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

//! Resolved queries: the unit stored in the query cache

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use super::builder::ParsedQuery;
use super::operation::{ParameterId, Query};
use crate::error::Result;
use crate::model::Value;

/// A query bound to its structural parameter values and cache hash
///
/// Runtime parameters are not part of a resolved query; they are supplied
/// on every execution, so one resolved query serves every capture sharing
/// its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedQuery {
    /// Operation structure
    pub query: Query,
    /// Structural parameter values by id
    pub structural: IndexMap<ParameterId, Value, FxBuildHasher>,
    /// Structural cache hash
    pub hash: String,
    /// Readable rendering of the operation chain
    pub compiled: String,
}

impl ResolvedQuery {
    /// Resolve a parsed query
    pub fn resolve(parsed: &ParsedQuery) -> Self {
        Self {
            query: parsed.query.clone(),
            structural: parsed
                .parameters
                .structural()
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect(),
            hash: parsed.hash(),
            compiled: parsed.query.to_string(),
        }
    }

    /// Structural value of a parameter
    pub fn structural_value(&self, id: &str) -> Option<&Value> {
        self.structural.get(id)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
