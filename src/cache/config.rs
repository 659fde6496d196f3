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

//! Query cache configuration options

/// Configuration for query caching behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Prefix of every cache key
    pub namespace: String,

    /// Whether resolved queries are looked up and stored at all
    pub enabled: bool,

    /// Clear the namespace once when an engine is created
    pub development_mode: bool,
}

impl CacheConfig {
    /// Create a new cache configuration with custom settings
    pub fn new(namespace: impl Into<String>, enabled: bool, development_mode: bool) -> Self {
        Self {
            namespace: namespace.into(),
            enabled,
            development_mode,
        }
    }

    /// Create a configuration with caching disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Create a configuration that starts every engine from an empty namespace
    pub fn development() -> Self {
        Self {
            development_mode: true,
            ..Self::default()
        }
    }

    /// Create a configuration for testing
    pub fn testing() -> Self {
        Self {
            namespace: "deferq-test".to_string(),
            enabled: true,
            development_mode: true,
        }
    }

    /// Full cache key for a query hash
    pub fn key(&self, hash: &str) -> String {
        format!("{}:{}", self.namespace, hash)
    }

    /// Prefix shared by every key in the namespace
    pub fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "deferq".to_string(),
            enabled: true,
            development_mode: false,
        }
    }
}
