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

//! Iterator schemes
//!
//! A scheme decides how operation stages are realized. The lazy scheme pulls
//! one element at a time; the eager scheme buffers each bounded operation
//! stage into memory on its first pull. Both produce the same entries in the
//! same order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::sequence::Sequence;
use super::set_ops::{ValueSet, build_set};
use crate::error::Result;
use crate::model::OrderedMap;

/// Concrete scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemeKind {
    /// Pull-based sequences
    Lazy,
    /// Stage-by-stage buffering
    Eager,
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lazy => write!(f, "lazy"),
            Self::Eager => write!(f, "eager"),
        }
    }
}

/// Requested scheme for a pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemePreference {
    /// Eager when a stage needs random access, lazy otherwise
    #[default]
    Auto,
    /// Always lazy
    Lazy,
    /// Always eager
    Eager,
}

impl SchemePreference {
    /// Pick the scheme for a pipeline
    pub fn select(self, needs_random_access: bool) -> SchemeKind {
        match self {
            Self::Auto if needs_random_access => SchemeKind::Eager,
            Self::Auto | Self::Lazy => SchemeKind::Lazy,
            Self::Eager => SchemeKind::Eager,
        }
    }
}

impl std::str::FromStr for SchemePreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            other => Err(format!("unknown scheme '{other}', expected auto, lazy or eager")),
        }
    }
}

/// Strategy for realizing operation stages
pub trait IteratorScheme: fmt::Debug + Send + Sync {
    /// Which scheme this is
    fn kind(&self) -> SchemeKind;

    /// Wrap a freshly built operation stage
    fn adapt(&self, stage: Sequence) -> Sequence;

    /// Materialize the values of `sequence` into a comparison set
    fn create_set(&self, sequence: &Sequence, operation: &str) -> Result<ValueSet> {
        build_set(sequence, operation)
    }

    /// Materialize `sequence` into a keyed map for random access
    fn create_ordered_map(&self, sequence: &Sequence) -> Result<OrderedMap> {
        sequence.to_map()
    }
}

/// Pull-based scheme: stages are left as built
#[derive(Debug, Clone, Copy, Default)]
pub struct LazyScheme;

impl IteratorScheme for LazyScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Lazy
    }

    fn adapt(&self, stage: Sequence) -> Sequence {
        stage
    }
}

/// Buffering scheme: every operation stage is materialized on first pull
///
/// Range stages and stages fed by an unbounded source stay unbuffered, so a
/// bounded slice of an unbounded source pulls no more than the lazy scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagerScheme;

impl IteratorScheme for EagerScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::Eager
    }

    fn adapt(&self, stage: Sequence) -> Sequence {
        match stage {
            Sequence::Range { .. } | Sequence::Generated(_) => stage,
            other if !other.is_bounded() => other,
            other => other.buffered(),
        }
    }
}

/// Instantiate a scheme
pub fn scheme_for(kind: SchemeKind) -> Arc<dyn IteratorScheme> {
    match kind {
        SchemeKind::Lazy => Arc::new(LazyScheme),
        SchemeKind::Eager => Arc::new(EagerScheme),
    }
}
