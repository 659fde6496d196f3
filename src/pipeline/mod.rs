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

//! Lazy sequence engine
//!
//! Operations over key/value sequences (filtering, projection, ordering,
//! grouping, joins, set algebra and slicing) realized through an
//! [`IteratorScheme`].

mod grouping;
mod join;
mod ordering;
mod range;
mod scheme;
mod sequence;
mod set_ops;
mod stage;

use std::sync::Arc;

use crate::error::Result;
use crate::model::Value;

pub use grouping::{GroupTable, build_groups, group_entries};
pub use join::{JoinFilter, JoinSpec};
pub use ordering::{Direction, OrderBy, sort_entries};
pub use range::RangeIterator;
pub use scheme::{EagerScheme, IteratorScheme, LazyScheme, SchemeKind, SchemePreference, scheme_for};
pub use sequence::{Generator, Projection, Sequence};
pub use set_ops::{SetOperationKind, ValueSet, build_set};
pub use stage::{Pull, StageIterator, StageStatus};

/// Function applied by a stage; receives `(value, key, ...)` positionally
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Wrap a closure as a stage function
pub fn function<F>(f: F) -> Function
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}
