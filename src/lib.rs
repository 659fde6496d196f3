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

//! Deferred collection queries in Rust
//!
//! Method chains captured over a variable (`$items->where(..)->take(3)`) are
//! parsed into structural queries, cached by shape and executed lazily over
//! key/value sequences.
//!
//! # Example
//!
//! ```
//! use deferq::ast::{BinaryOperator, Expression};
//! use deferq::{QueryEngine, Value};
//!
//! let predicate = Expression::arrow(
//!     &["n"],
//!     Expression::binary(
//!         Expression::variable("n"),
//!         BinaryOperator::GreaterThan,
//!         Expression::value(1),
//!     ),
//! );
//! let chain = Expression::method_call(
//!     Expression::method_call(Expression::variable("numbers"), "where", vec![predicate]),
//!     "count",
//!     Vec::<deferq::ast::Expr>::new(),
//! );
//!
//! let engine = QueryEngine::default();
//! let count = engine.execute_with(&chain, Value::list([1, 2, 3].map(Value::Int))).unwrap();
//! assert_eq!(count, Value::Int(2));
//! ```

pub mod ast;
pub mod cache;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod parsing;
pub mod pipeline;
pub mod query;
pub mod registry;

pub use cache::{CacheConfig, MemoryCache, NullCache, QueryCache};
pub use engine::{EngineConfig, QueryEngine};
pub use error::{QueryError, Result};
pub use evaluator::{Callable, EvaluationContext, Evaluator};
pub use model::{OrderedMap, Value};
pub use pipeline::{SchemePreference, Sequence};
pub use query::{ParsedQuery, QueryBuilder, ResolvedQuery};
pub use registry::FunctionRegistry;
