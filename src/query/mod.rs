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

//! Query model
//!
//! A method chain over a variable is unwound into a [`Query`] of operations
//! and a terminal request, with every argument registered in a
//! [`ParameterRegistry`]. The structural part is hashed and resolved into a
//! cacheable [`ResolvedQuery`]; the [`QueryExecutor`] runs it against the
//! sequence engine with the runtime arguments bound.

pub mod builder;
pub mod executor;
pub mod operation;
pub mod parameters;
pub mod resolved;

pub use builder::{ParsedQuery, QueryBuilder};
pub use executor::QueryExecutor;
pub use operation::{
    AggregateKind, JoinCondition, JoinParameters, Operation, OrderingParameters, ParameterId, Query,
    Request, describe_parameter, parameter_id,
};
pub use parameters::{ArgumentRole, Parameter, ParameterRegistry, ParameterValue};
pub use resolved::ResolvedQuery;
