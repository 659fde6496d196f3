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

//! Runtime callables and closure execution

use std::fmt;
use std::sync::Arc;

use super::context::EvaluationContext;
use super::engine::Evaluator;
use super::operators::apply_binary;
use crate::ast::{AssignOperator, ClosureData, Expr, Expression, compile};
use crate::error::{QueryError, Result};
use crate::model::{OrderedMap, Value};
use crate::registry::NativeFunction;

/// A function value supplied as a runtime parameter
#[derive(Clone)]
pub enum Callable {
    /// Native Rust closure
    Native {
        /// Name used in diagnostics
        name: String,
        /// Implementation
        function: NativeFunction,
    },
    /// Registered builtin resolved by name at call time
    Builtin(String),
    /// Closure definition bound to the scope it was captured in
    Closure {
        /// The `ClosureDef` expression
        definition: Expr,
        /// Capture scope
        scope: Arc<EvaluationContext>,
    },
}

impl Callable {
    /// Wrap a native Rust closure
    pub fn native<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Native {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    /// Refer to a registered builtin
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::Builtin(name.into())
    }

    /// Bind a closure definition to its capture scope
    pub fn closure(definition: Expr, scope: Arc<EvaluationContext>) -> Result<Self> {
        match &*definition {
            Expression::ClosureDef(_) => Ok(Self::Closure { definition, scope }),
            other => Err(QueryError::structural(
                other.kind().name(),
                "callable must be a closure definition",
            )),
        }
    }

    /// Description used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            Self::Native { name, .. } => format!("native {name}"),
            Self::Builtin(name) => format!("builtin {name}"),
            Self::Closure { definition, .. } => compile(definition),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.describe())
    }
}

impl Evaluator {
    /// Invoke a callable with positional arguments
    ///
    /// Arguments beyond the callable's declared parameters are ignored.
    pub fn call(&self, callable: &Callable, args: &[Value]) -> Result<Value> {
        match callable {
            Callable::Native { function, .. } => function(args),
            Callable::Builtin(name) => {
                let arity = self
                    .functions()
                    .signature(name)
                    .and_then(|signature| signature.max_args)
                    .unwrap_or(args.len());
                self.functions().call(name, &args[..arity.min(args.len())])
            }
            Callable::Closure { definition, scope } => match &**definition {
                Expression::ClosureDef(data) => self.invoke_closure(data, scope, args),
                other => Err(QueryError::structural(
                    other.kind().name(),
                    "callable must be a closure definition",
                )),
            },
        }
    }

    fn invoke_closure(
        &self,
        data: &ClosureData,
        scope: &Arc<EvaluationContext>,
        args: &[Value],
    ) -> Result<Value> {
        let mut frame = if data.captures_scope {
            EvaluationContext::child(scope.clone())
        } else {
            EvaluationContext::new()
        };

        // Only `use` variables cross into a non-capturing frame; unbound ones read as null.
        for used in &data.used_variables {
            if data.captures_scope && scope.is_bound(&used.name) {
                continue;
            }
            let value = scope.lookup(&used.name).cloned().unwrap_or_default();
            frame.set_variable(used.name.clone(), value);
        }

        for (position, parameter) in data.parameters.iter().enumerate() {
            let Expression::Parameter(parameter) = &**parameter else {
                return Err(QueryError::structural_at(
                    parameter.kind().name(),
                    format!("parameter {position}"),
                    "parameter list entries must be parameters",
                ));
            };
            let value = if parameter.variadic {
                Value::list(args.iter().skip(position).cloned())
            } else if let Some(argument) = args.get(position) {
                argument.clone()
            } else if let Some(default) = &parameter.default {
                self.evaluate(default, &frame)?
            } else {
                return Err(QueryError::unbound_variable(parameter.name.clone()));
            };
            frame.set_variable(parameter.name.clone(), value);
        }

        for statement in &data.body {
            if let Some(returned) = self.execute_statement(statement, &mut frame)? {
                return Ok(returned);
            }
        }
        Ok(Value::Null)
    }

    /// Execute one body statement; `Some` ends the body with a return value
    fn execute_statement(
        &self,
        statement: &Expr,
        frame: &mut EvaluationContext,
    ) -> Result<Option<Value>> {
        match &**statement {
            Expression::Return { value } => Ok(Some(match value {
                Some(value) => self.evaluate(value, frame)?,
                None => Value::Null,
            })),
            Expression::Throw { exception } => {
                let thrown = self.evaluate(exception, frame)?;
                let message = match &thrown {
                    Value::Object(object) => object
                        .properties
                        .get(&Value::from("message"))
                        .map_or_else(|| object.class.clone(), Value::to_string),
                    other => other.to_string(),
                };
                Err(QueryError::Thrown { message })
            }
            Expression::Unset { values } => {
                for target in values {
                    self.unset_target(target, frame)?;
                }
                Ok(None)
            }
            Expression::Assign(data) => {
                let value = match data.op.binary_operator() {
                    None => self.evaluate(&data.value, frame)?,
                    Some(op) => {
                        let current = self.evaluate_quiet(&data.target, frame)?.unwrap_or_default();
                        if data.op == AssignOperator::NullCoalesce && !current.is_null() {
                            return Ok(None);
                        }
                        let operand = self.evaluate(&data.value, frame)?;
                        apply_binary(op, &current, &operand)?
                    }
                };
                self.assign_target(&data.target, value, frame)?;
                Ok(None)
            }
            _ => {
                self.evaluate(statement, frame)?;
                Ok(None)
            }
        }
    }

    fn local_name(&self, target: &Expr, frame: &EvaluationContext) -> Result<String> {
        match &**target {
            Expression::Variable { name } => Ok(self.evaluate(name, frame)?.to_string()),
            other => Err(QueryError::not_a_constant(other.kind().name(), compile(target))),
        }
    }

    fn assign_target(
        &self,
        target: &Expr,
        value: Value,
        frame: &mut EvaluationContext,
    ) -> Result<()> {
        match &**target {
            Expression::Variable { .. } => {
                let name = self.local_name(target, frame)?;
                frame.set_variable(name, value);
                Ok(())
            }
            Expression::Index { value: container, index } => {
                let name = self.local_name(container, frame)?;
                let mut map = match frame.lookup(&name) {
                    Some(Value::Array(map)) => (**map).clone(),
                    Some(Value::Null) | None => OrderedMap::new(),
                    Some(other) => {
                        return Err(QueryError::type_mismatch(
                            "array",
                            other.type_name(),
                            Some(format!("assignment to {}", compile(target))),
                        ));
                    }
                };
                match index {
                    Some(index) => {
                        let key = self.array_key(index, frame)?;
                        map.insert(key, value);
                    }
                    None => map.push(value),
                }
                frame.set_variable(name, Value::array(map));
                Ok(())
            }
            _ => Err(QueryError::not_a_constant(target.kind().name(), compile(target))),
        }
    }

    fn unset_target(&self, target: &Expr, frame: &mut EvaluationContext) -> Result<()> {
        match &**target {
            Expression::Variable { .. } => {
                let name = self.local_name(target, frame)?;
                frame.unset_variable(&name);
                Ok(())
            }
            Expression::Index {
                value: container,
                index: Some(index),
            } => {
                let name = self.local_name(container, frame)?;
                if let Some(Value::Array(map)) = frame.lookup(&name) {
                    let mut map = (**map).clone();
                    map.remove(&self.array_key(index, frame)?);
                    frame.set_variable(name, Value::array(map));
                }
                Ok(())
            }
            _ => Err(QueryError::structural(
                target.kind().name(),
                "unset target must be a variable or an array element",
            )),
        }
    }
}
