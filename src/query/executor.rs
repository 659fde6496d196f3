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

//! Query execution over the sequence engine

use std::cmp::Ordering;
use std::sync::Arc;

use super::operation::{
    AggregateKind, JoinCondition, JoinParameters, Operation, ParameterId, Request,
    describe_parameter,
};
use super::parameters::{ParameterRegistry, ParameterValue};
use super::resolved::ResolvedQuery;
use crate::ast::{BinaryOperator, Expr, Expression};
use crate::error::{QueryError, Result};
use crate::evaluator::operators::{apply_binary, to_int};
use crate::evaluator::{Callable, EvaluationContext, Evaluator};
use crate::model::{CollectionFactory, Value, factory_for};
use crate::pipeline::{
    Function, IteratorScheme, JoinFilter, JoinSpec, OrderBy, SchemePreference, Sequence, scheme_for,
};

/// Runs resolved queries against a source bound in an evaluation context
#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    evaluator: Evaluator,
    preference: SchemePreference,
}

impl QueryExecutor {
    /// Create an executor
    pub fn new(evaluator: Evaluator, preference: SchemePreference) -> Self {
        Self {
            evaluator,
            preference,
        }
    }

    /// Execute `resolved`, binding runtime arguments from `parameters`
    ///
    /// The query source is read from `context` by name.
    pub fn execute(
        &self,
        resolved: &ResolvedQuery,
        parameters: &ParameterRegistry,
        context: Arc<EvaluationContext>,
    ) -> Result<Value> {
        let query = &resolved.query;
        let source = context
            .lookup(&query.source)
            .cloned()
            .ok_or_else(|| QueryError::unbound_variable(query.source.clone()))?;

        let scheme = scheme_for(self.preference.select(query.needs_random_access()));
        log::debug!("executing {} with the {} scheme", resolved.compiled, scheme.kind());

        let binder = Binder {
            evaluator: &self.evaluator,
            resolved,
            parameters,
            context,
            factory: factory_for(&source),
        };

        let mut sequence = Sequence::from_value(&source, "from")?;
        for operation in &query.operations {
            sequence = scheme.adapt(binder.apply(operation, sequence)?);
        }
        binder.request(&query.request, &sequence, scheme.as_ref())
    }
}

/// Binds parameter ids to values and functions for one execution
struct Binder<'a> {
    evaluator: &'a Evaluator,
    resolved: &'a ResolvedQuery,
    parameters: &'a ParameterRegistry,
    context: Arc<EvaluationContext>,
    factory: Arc<dyn CollectionFactory>,
}

impl Binder<'_> {
    fn invalid(&self, id: &str, message: impl Into<String>) -> QueryError {
        let (verb, index) = describe_parameter(id);
        QueryError::invalid_argument(verb, index, message)
    }

    fn runtime_expression(&self, id: &str) -> Result<&Expr> {
        match self.parameters.get(id).map(|parameter| &parameter.value) {
            Some(ParameterValue::Runtime(expression)) => Ok(expression),
            Some(ParameterValue::Structural(_)) | None => {
                Err(self.invalid(id, format!("no runtime argument bound to {id}")))
            }
        }
    }

    /// Resolve a value argument
    fn value(&self, id: &ParameterId) -> Result<Value> {
        if let Some(value) = self.resolved.structural_value(id) {
            return Ok(value.clone());
        }
        let expression = self.runtime_expression(id)?;
        self.evaluator
            .simplify_to_value(expression, &self.context)
            .map_err(|err| {
                self.invalid(id, format!("argument could not be reduced to a value: {err}"))
            })
    }

    /// Resolve a non-negative integer argument
    fn count(&self, id: &ParameterId) -> Result<usize> {
        let value = self.value(id)?;
        usize::try_from(to_int(&value)).map_err(|_| {
            self.invalid(
                id,
                format!("expected a non-negative integer, got {}", value.describe()),
            )
        })
    }

    /// Resolve a function argument
    fn function(&self, id: &ParameterId) -> Result<Function> {
        let expression = self.runtime_expression(id)?;
        let callable = match &**expression {
            Expression::ClosureDef(_) => {
                Callable::closure(expression.clone(), self.context.clone())?
            }
            Expression::Value(Value::String(name)) => Callable::builtin(name.to_string()),
            Expression::Variable { .. } => {
                let name = expression.as_variable_name().ok_or_else(|| {
                    self.invalid(id, "function variables must have constant names")
                })?;
                self.context
                    .lookup_callable(name)
                    .cloned()
                    .ok_or_else(|| QueryError::unbound_variable(name))?
            }
            other => {
                return Err(self.invalid(id, format!("{} is not callable", other.kind().name())));
            }
        };
        let evaluator = self.evaluator.clone();
        Ok(Arc::new(move |args: &[Value]| evaluator.call(&callable, args)))
    }

    fn optional_function(&self, id: Option<&ParameterId>) -> Result<Option<Function>> {
        id.map(|id| self.function(id)).transpose()
    }

    /// Sequence over a collection argument
    fn collection(&self, id: &ParameterId, operation: &str) -> Result<Sequence> {
        Sequence::from_value(&self.value(id)?, operation)
    }

    fn apply(&self, operation: &Operation, sequence: Sequence) -> Result<Sequence> {
        Ok(match operation {
            Operation::Where { predicate } => sequence.filter(self.function(predicate)?),
            Operation::Select { function } => sequence.select(self.function(function)?),
            Operation::SelectMany { function } => sequence.select_many(self.function(function)?),
            Operation::IndexBy { function } => sequence.index_by(self.function(function)?),
            Operation::Keys => sequence.keys(),
            Operation::Reindex => sequence.reindex(),
            Operation::OrderBy { orderings } => {
                let orderings = orderings
                    .iter()
                    .map(|ordering| {
                        Ok(OrderBy::new(
                            self.function(&ordering.function)?,
                            ordering.direction,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Sequence::Ordered {
                    base: Box::new(sequence),
                    orderings,
                }
            }
            Operation::GroupBy { function } => {
                sequence.group_by(self.function(function)?, self.factory.clone())
            }
            Operation::Join(join) => self.join(join, sequence)?,
            Operation::Unique => sequence.unique(),
            Operation::SetOperation { kind, other } => {
                sequence.set_operation(*kind, self.collection(other, kind.name())?)
            }
            Operation::Range { start, amount } => {
                let start = start.as_ref().map(|id| self.count(id)).transpose()?.unwrap_or(0);
                let amount = amount.as_ref().map(|id| self.count(id)).transpose()?;
                sequence.slice(start, amount)
            }
        })
    }

    fn join(&self, join: &JoinParameters, outer: Sequence) -> Result<Sequence> {
        let operation = if join.grouped { "groupJoin" } else { "join" };
        let filter = match &join.condition {
            JoinCondition::Cross => JoinFilter::Cross,
            JoinCondition::On(predicate) => JoinFilter::On(self.function(predicate)?),
            JoinCondition::OnEquality { outer, inner } => JoinFilter::OnEquality {
                outer: self.function(outer)?,
                inner: self.function(inner)?,
            },
        };
        let default = match &join.default {
            Some((value, key)) => Some((self.value(key)?, self.value(value)?)),
            None => None,
        };
        Ok(Sequence::join(JoinSpec {
            outer,
            inner: self.collection(&join.inner, operation)?,
            filter,
            default,
            projection: self.function(&join.projection)?,
            grouped: join.grouped,
            factory: self.factory.clone(),
        }))
    }

    fn request(
        &self,
        request: &Request,
        sequence: &Sequence,
        scheme: &dyn IteratorScheme,
    ) -> Result<Value> {
        match request {
            Request::AsArray => Ok(Value::array(scheme.create_ordered_map(sequence)?)),
            Request::GetIterator => {
                let pairs = sequence
                    .iter()
                    .map(|entry| entry.map(|(key, value)| Value::list([key, value])))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::list(pairs))
            }
            Request::Count => {
                let mut count = 0usize;
                for entry in sequence.iter() {
                    entry?;
                    count += 1;
                }
                Ok(Value::from(count))
            }
            Request::IsEmpty => match sequence.iter().next() {
                None => Ok(Value::Bool(true)),
                Some(entry) => entry.map(|_| Value::Bool(false)),
            },
            Request::First => match sequence.iter().next() {
                None => Ok(Value::Null),
                Some(entry) => entry.map(|(_, value)| value),
            },
            Request::Last => {
                let mut last = Value::Null;
                for entry in sequence.iter() {
                    last = entry?.1;
                }
                Ok(last)
            }
            Request::Contains { value } => {
                let needle = self.value(value)?;
                for entry in sequence.iter() {
                    if entry?.1 == needle {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Request::OffsetGet { key } => {
                let map = scheme.create_ordered_map(sequence)?;
                Ok(map.get(&self.value(key)?).cloned().unwrap_or_default())
            }
            Request::OffsetExists { key } => {
                let map = scheme.create_ordered_map(sequence)?;
                Ok(Value::Bool(map.contains_key(&self.value(key)?)))
            }
            Request::Aggregate { kind, function } => {
                let projection = self.optional_function(function.as_ref())?;
                aggregate(*kind, projected(sequence, projection))
            }
            Request::Implode {
                delimiter,
                function,
            } => {
                let delimiter = self.value(delimiter)?.to_string();
                let projection = self.optional_function(function.as_ref())?;
                let parts = projected(sequence, projection)
                    .map(|value| value.map(|value| value.to_string()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::string(parts.join(&delimiter)))
            }
            Request::Fold { function } => {
                let function = self.function(function)?;
                let mut accumulator: Option<Value> = None;
                for entry in sequence.iter() {
                    let (_, value) = entry?;
                    accumulator = Some(match accumulator {
                        None => value,
                        Some(acc) => function(&[acc, value])?,
                    });
                }
                Ok(accumulator.unwrap_or_default())
            }
        }
    }
}

/// Values of a sequence, optionally mapped through `projection(value, key)`
fn projected(
    sequence: &Sequence,
    projection: Option<Function>,
) -> impl Iterator<Item = Result<Value>> {
    sequence.iter().map(move |entry| {
        let (key, value) = entry?;
        match &projection {
            Some(function) => function(&[value, key]),
            None => Ok(value),
        }
    })
}

fn aggregate(
    kind: AggregateKind,
    mut values: impl Iterator<Item = Result<Value>>,
) -> Result<Value> {
    match kind {
        AggregateKind::Sum => values.try_fold(Value::Int(0), |sum, value| {
            apply_binary(BinaryOperator::Add, &sum, &value?)
        }),
        AggregateKind::Average => {
            let mut count = 0i64;
            let mut sum = Value::Int(0);
            for value in values {
                sum = apply_binary(BinaryOperator::Add, &sum, &value?)?;
                count += 1;
            }
            if count == 0 {
                return Ok(Value::Null);
            }
            apply_binary(BinaryOperator::Divide, &sum, &Value::Int(count))
        }
        AggregateKind::Minimum | AggregateKind::Maximum => {
            let keep = if kind == AggregateKind::Minimum {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for value in values {
                let value = value?;
                best = Some(match best {
                    Some(current) if value.compare(&current, kind.name())? != keep => current,
                    _ => value,
                });
            }
            Ok(best.unwrap_or_default())
        }
        AggregateKind::All => {
            for value in values {
                if !value?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        AggregateKind::Any => {
            for value in values {
                if value?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}
