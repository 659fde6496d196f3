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

//! Declaration metadata of host callables

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Where a callable is defined in host source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionLocation {
    /// Source file path
    pub file_path: String,
    /// Enclosing namespace
    pub namespace: Option<String>,
    /// First line of the definition
    pub start_line: u32,
    /// Last line of the definition
    pub end_line: u32,
}

impl FunctionLocation {
    /// Create a location
    pub fn new(file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            file_path: file_path.into(),
            namespace: None,
            start_line,
            end_line,
        }
    }

    /// Set the enclosing namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Content hash of the location
    pub fn hash_hex(&self) -> String {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Reflection of a callable: its location plus declaration signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionReflection {
    /// Definition location
    pub location: FunctionLocation,
    /// Declared parameter names in order
    pub parameter_names: Vec<String>,
    /// Declared static
    pub is_static: bool,
    /// Returns by reference
    pub returns_ref: bool,
    /// Class scope the callable is bound to
    pub scope_class: Option<String>,
}

impl FunctionReflection {
    /// Create a reflection for a callable at `location`
    pub fn new(location: FunctionLocation, parameter_names: Vec<String>) -> Self {
        Self {
            location,
            parameter_names,
            is_static: false,
            returns_ref: false,
            scope_class: None,
        }
    }

    /// Hash of the declaration signature
    pub fn signature_hash(&self) -> String {
        let mut hasher = FxHasher::default();
        self.parameter_names.hash(&mut hasher);
        self.is_static.hash(&mut hasher);
        self.returns_ref.hash(&mut hasher);
        self.scope_class.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Global hash: location hash plus signature hash
    ///
    /// Two reflections with the same global hash denote the same parsed
    /// structure.
    pub fn global_hash(&self) -> String {
        format!("{}-{}", self.location.hash_hex(), self.signature_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_hash_distinguishes_location_and_signature() {
        let location = FunctionLocation::new("src/report.rs", 10, 12);
        let a = FunctionReflection::new(location.clone(), vec!["row".into()]);
        let b = FunctionReflection::new(location.clone(), vec!["row".into()]);
        let c = FunctionReflection::new(location, vec!["row".into(), "key".into()]);
        let d = FunctionReflection::new(
            FunctionLocation::new("src/report.rs", 20, 22),
            vec!["row".into()],
        );

        assert_eq!(a.global_hash(), b.global_hash());
        assert_ne!(a.global_hash(), c.global_hash());
        assert_ne!(a.global_hash(), d.global_hash());
    }
}
