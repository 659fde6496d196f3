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

//! Parameter registry
//!
//! Operation arguments are split into structural parameters, whose literal
//! values shape the compiled query and enter its hash, and runtime
//! parameters, which are bound anew on every execution.

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use super::operation::ParameterId;
use crate::ast::Expr;
use crate::model::Value;

/// How an argument is consumed by its operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentRole {
    /// Called per element
    Function,
    /// Plain value, may depend on runtime variables
    Value,
    /// Must be known when the query is built
    Constant,
}

/// Registered argument payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Literal known at build time
    Structural(Value),
    /// Expression resolved at execution time
    Runtime(Expr),
}

/// One registered argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    /// Argument role
    pub role: ArgumentRole,
    /// Payload
    pub value: ParameterValue,
}

impl Parameter {
    /// Whether the parameter is structural
    pub fn is_structural(&self) -> bool {
        matches!(self.value, ParameterValue::Structural(_))
    }
}

/// Parameter id to argument table, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRegistry {
    parameters: IndexMap<ParameterId, Parameter, FxBuildHasher>,
}

impl ParameterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a structural parameter
    pub fn add_structural(&mut self, id: ParameterId, role: ArgumentRole, value: Value) {
        self.parameters.insert(
            id,
            Parameter {
                role,
                value: ParameterValue::Structural(value),
            },
        );
    }

    /// Register a runtime parameter
    pub fn add_runtime(&mut self, id: ParameterId, role: ArgumentRole, expression: Expr) {
        self.parameters.insert(
            id,
            Parameter {
                role,
                value: ParameterValue::Runtime(expression),
            },
        );
    }

    /// Look a parameter up
    pub fn get(&self, id: &str) -> Option<&Parameter> {
        self.parameters.get(id)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Check if no parameter is registered
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// All parameters in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&ParameterId, &Parameter)> {
        self.parameters.iter()
    }

    /// Structural parameters with their values
    pub fn structural(&self) -> impl Iterator<Item = (&ParameterId, &Value)> {
        self.parameters.iter().filter_map(|(id, parameter)| match &parameter.value {
            ParameterValue::Structural(value) => Some((id, value)),
            ParameterValue::Runtime(_) => None,
        })
    }

    /// Runtime parameters with their expressions
    pub fn runtime(&self) -> impl Iterator<Item = (&ParameterId, &Expr)> {
        self.parameters.iter().filter_map(|(id, parameter)| match &parameter.value {
            ParameterValue::Runtime(expression) => Some((id, expression)),
            ParameterValue::Structural(_) => None,
        })
    }

    /// Hash of the structural parameters
    ///
    /// Every parameter's id and kind is hashed so that moving an argument
    /// between the structural and runtime sets changes the hash; only
    /// structural values contribute their content.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for (id, parameter) in &self.parameters {
            id.hash(&mut hasher);
            parameter.role.hash(&mut hasher);
            match &parameter.value {
                ParameterValue::Structural(value) => {
                    0u8.hash(&mut hasher);
                    value.hash(&mut hasher);
                }
                ParameterValue::Runtime(_) => 1u8.hash(&mut hasher),
            }
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;

    #[test]
    fn test_partitions() {
        let mut registry = ParameterRegistry::new();
        registry.add_runtime(
            "0-where-0".into(),
            ArgumentRole::Function,
            Expression::arrow(&["x"], Expression::variable("x")),
        );
        registry.add_structural("1-take-0".into(), ArgumentRole::Value, Value::Int(5));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.structural().count(), 1);
        assert_eq!(registry.runtime().next().map(|(id, _)| id.as_str()), Some("0-where-0"));
        assert!(registry.get("1-take-0").is_some_and(Parameter::is_structural));
    }

    #[test]
    fn test_structural_hash_ignores_runtime_expressions() {
        let build = |limit: i64, threshold: i64| {
            let mut registry = ParameterRegistry::new();
            let predicate = Expression::arrow(
                &["x"],
                Expression::binary(
                    Expression::variable("x"),
                    crate::ast::BinaryOperator::GreaterThan,
                    Expression::value(threshold),
                ),
            );
            registry.add_runtime("0-where-0".into(), ArgumentRole::Function, predicate);
            registry.add_structural("1-take-0".into(), ArgumentRole::Value, Value::Int(limit));
            registry.structural_hash()
        };
        assert_eq!(build(5, 1), build(5, 100));
        assert_ne!(build(5, 1), build(6, 1));
    }
}
