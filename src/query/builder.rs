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

//! Query builder
//!
//! Turns a captured call chain such as
//! `$people->where(fn)->orderByDescending(fn)->take(10)->count()` into a
//! [`Query`] plus the [`ParameterRegistry`] holding its arguments.

use crate::ast::{Expr, Expression, validate_expression};
use crate::error::{QueryError, Result};
use crate::evaluator::{EvaluationContext, Evaluator};
use crate::model::Value;
use crate::pipeline::{Direction, SetOperationKind};

use super::operation::{
    AggregateKind, JoinCondition, JoinParameters, Operation, OrderingParameters, ParameterId, Query,
    Request, parameter_id,
};
use super::parameters::{ArgumentRole, ParameterRegistry};

/// A parsed query with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Operation structure
    pub query: Query,
    /// Registered arguments
    pub parameters: ParameterRegistry,
}

impl ParsedQuery {
    /// Structural cache hash
    ///
    /// Structural parameter hash followed by the operation shape hash. Queries
    /// differing only in runtime parameters share the hash.
    pub fn hash(&self) -> String {
        format!(
            "{:016x}#{:016x}",
            self.parameters.structural_hash(),
            self.query.shape_hash()
        )
    }
}

/// One method call of a captured chain
#[derive(Debug, Clone)]
struct Call {
    verb: String,
    args: Vec<Expr>,
}

struct PendingJoin {
    position: usize,
    verb: String,
    inner: ParameterId,
    grouped: bool,
    condition: JoinCondition,
    default: Option<(ParameterId, ParameterId)>,
}

/// Builds queries from captured call chains
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    evaluator: Evaluator,
    context: EvaluationContext,
}

impl QueryBuilder {
    /// Create a builder resolving constants under `context`
    pub fn new(evaluator: Evaluator, context: EvaluationContext) -> Self {
        Self { evaluator, context }
    }

    /// Parse a captured call chain
    pub fn build(&self, chain: &Expr) -> Result<ParsedQuery> {
        let (source, calls) = self.unwind(chain)?;
        let mut parser = ChainParser {
            builder: self,
            parameters: ParameterRegistry::new(),
            operations: Vec::new(),
            pending_join: None,
            request: None,
            last_verb: None,
        };

        let last = calls.len().saturating_sub(1);
        for (position, call) in calls.iter().enumerate() {
            if parser.request.is_some() {
                return Err(QueryError::structural_at(
                    call.verb.clone(),
                    format!("call {position}"),
                    "a request must be the last call of a query",
                ));
            }
            parser.parse_call(position, call, position == last)?;
        }
        if let Some(pending) = parser.pending_join {
            return Err(QueryError::structural_at(
                pending.verb,
                format!("call {}", pending.position),
                "a join must be completed with to()",
            ));
        }

        let query = Query {
            source,
            operations: parser.operations,
            request: parser.request.unwrap_or(Request::AsArray),
        };
        log::trace!("built query {query}");
        Ok(ParsedQuery {
            query,
            parameters: parser.parameters,
        })
    }

    /// Walk from the outermost call down to the source variable
    fn unwind(&self, chain: &Expr) -> Result<(String, Vec<Call>)> {
        let mut calls = Vec::new();
        let mut current = chain;
        loop {
            match &**current {
                Expression::MethodCall(data) => {
                    let verb = match self.evaluator.constant_value(&data.name) {
                        Some(Value::String(name)) => name.to_string(),
                        _ => {
                            return Err(QueryError::invalid_argument(
                                "MethodCall",
                                0,
                                "query method names must be constant strings",
                            ));
                        }
                    };
                    for arg in &data.args {
                        validate_expression(arg)?;
                    }
                    calls.push(Call {
                        verb,
                        args: data.args.to_vec(),
                    });
                    current = &data.value;
                }
                Expression::Variable { .. } => {
                    let source = current
                        .as_variable_name()
                        .ok_or_else(|| {
                            QueryError::structural(
                                "Variable",
                                "query source must have a constant name",
                            )
                        })?
                        .to_string();
                    calls.reverse();
                    return Ok((source, calls));
                }
                other => {
                    return Err(QueryError::structural(
                        other.kind().name(),
                        "a query must start from a source variable",
                    ));
                }
            }
        }
    }
}

struct ChainParser<'a> {
    builder: &'a QueryBuilder,
    parameters: ParameterRegistry,
    operations: Vec<Operation>,
    pending_join: Option<PendingJoin>,
    request: Option<Request>,
    last_verb: Option<String>,
}

impl ChainParser<'_> {
    fn parse_call(&mut self, position: usize, call: &Call, is_last: bool) -> Result<()> {
        let verb = call.verb.as_str();
        let join_step = matches!(verb, "on" | "onEquality" | "withDefault" | "to");
        if self.pending_join.is_some() && !join_step {
            return Err(QueryError::structural_at(
                verb,
                format!("call {position}"),
                "a join must be completed with to() before other operations",
            ));
        }

        match verb {
            "where" => {
                let predicate = self.function(position, call, 0)?;
                self.operations.push(Operation::Where { predicate });
            }
            "select" => {
                let function = self.function(position, call, 0)?;
                self.operations.push(Operation::Select { function });
            }
            "selectMany" => {
                let function = self.function(position, call, 0)?;
                self.operations.push(Operation::SelectMany { function });
            }
            "indexBy" => {
                let function = self.function(position, call, 0)?;
                self.operations.push(Operation::IndexBy { function });
            }
            "keys" => self.operations.push(Operation::Keys),
            "reindex" => self.operations.push(Operation::Reindex),
            "orderBy" | "orderByAscending" | "orderByDescending" => {
                let ordering = self.ordering(position, call)?;
                self.operations.push(Operation::OrderBy {
                    orderings: vec![ordering],
                });
            }
            "thenBy" | "thenByAscending" | "thenByDescending" => {
                let follows_ordering = self
                    .last_verb
                    .as_deref()
                    .is_some_and(|last| last.starts_with("orderBy") || last.starts_with("thenBy"));
                let ordering = self.ordering(position, call)?;
                match self.operations.last_mut() {
                    Some(Operation::OrderBy { orderings }) if follows_ordering => {
                        orderings.push(ordering)
                    }
                    _ => {
                        return Err(QueryError::structural_at(
                            verb,
                            format!("call {position}"),
                            "a secondary ordering must directly follow an ordering",
                        ));
                    }
                }
            }
            "groupBy" => {
                let function = self.function(position, call, 0)?;
                self.operations.push(Operation::GroupBy { function });
            }
            "join" | "groupJoin" => {
                let inner = self.value(position, call, 0)?;
                self.pending_join = Some(PendingJoin {
                    position,
                    verb: verb.to_string(),
                    inner,
                    grouped: verb == "groupJoin",
                    condition: JoinCondition::Cross,
                    default: None,
                });
            }
            "on" => {
                let predicate = self.function(position, call, 0)?;
                self.pending_join_mut(position, verb)?.condition = JoinCondition::On(predicate);
            }
            "onEquality" => {
                let outer = self.function(position, call, 0)?;
                let inner = self.function(position, call, 1)?;
                self.pending_join_mut(position, verb)?.condition =
                    JoinCondition::OnEquality { outer, inner };
            }
            "withDefault" => {
                let value = self.value(position, call, 0)?;
                let key = self.optional_value(position, call, 1)?;
                self.pending_join_mut(position, verb)?.default = Some((value, key));
            }
            "to" => {
                let projection = self.function(position, call, 0)?;
                self.pending_join_mut(position, verb)?;
                if let Some(pending) = self.pending_join.take() {
                    self.operations.push(Operation::Join(JoinParameters {
                        inner: pending.inner,
                        condition: pending.condition,
                        default: pending.default,
                        projection,
                        grouped: pending.grouped,
                    }));
                }
            }
            "unique" => self.operations.push(Operation::Unique),
            "union" | "intersect" | "difference" | "except" | "append" | "whereIn"
            | "whereNotIn" => {
                let kind = match verb {
                    "union" => SetOperationKind::Union,
                    "intersect" => SetOperationKind::Intersect,
                    "append" => SetOperationKind::Append,
                    "whereIn" => SetOperationKind::WhereIn,
                    "whereNotIn" => SetOperationKind::WhereNotIn,
                    _ => SetOperationKind::Except,
                };
                let other = self.value(position, call, 0)?;
                self.operations.push(Operation::SetOperation { kind, other });
            }
            "skip" => {
                let start = Some(self.value(position, call, 0)?);
                self.operations.push(Operation::Range { start, amount: None });
            }
            "take" => {
                let amount = Some(self.value(position, call, 0)?);
                self.operations.push(Operation::Range { start: None, amount });
            }
            "slice" => {
                let start = Some(self.value(position, call, 0)?);
                let amount = self.optional_value_if_present(position, call, 1)?;
                self.operations.push(Operation::Range { start, amount });
            }
            _ => {
                let request = self.request(position, call)?;
                if !is_last {
                    return Err(QueryError::structural_at(
                        verb,
                        format!("call {position}"),
                        "a request must be the last call of a query",
                    ));
                }
                self.request = Some(request);
            }
        }
        self.last_verb = Some(call.verb.clone());
        Ok(())
    }

    fn request(&mut self, position: usize, call: &Call) -> Result<Request> {
        let verb = call.verb.as_str();
        let aggregate = |kind| Request::Aggregate {
            kind,
            function: None,
        };
        let mut request = match verb {
            "asArray" => Request::AsArray,
            "getIterator" => Request::GetIterator,
            "count" => Request::Count,
            "isEmpty" => Request::IsEmpty,
            "first" => Request::First,
            "last" => Request::Last,
            "contains" => Request::Contains {
                value: self.value(position, call, 0)?,
            },
            "offsetGet" => Request::OffsetGet {
                key: self.value(position, call, 0)?,
            },
            "offsetExists" => Request::OffsetExists {
                key: self.value(position, call, 0)?,
            },
            "sum" => aggregate(AggregateKind::Sum),
            "average" => aggregate(AggregateKind::Average),
            "minimum" => aggregate(AggregateKind::Minimum),
            "maximum" => aggregate(AggregateKind::Maximum),
            "all" => aggregate(AggregateKind::All),
            "any" => aggregate(AggregateKind::Any),
            "implode" => Request::Implode {
                delimiter: self.value(position, call, 0)?,
                function: self.optional_function(position, call, 1)?,
            },
            "aggregate" => Request::Fold {
                function: self.function(position, call, 0)?,
            },
            _ => {
                return Err(QueryError::structural_at(
                    verb,
                    format!("call {position}"),
                    format!("unknown query operation '{verb}'"),
                ));
            }
        };
        if let Request::Aggregate { function, .. } = &mut request {
            *function = self.optional_function(position, call, 0)?;
        }
        Ok(request)
    }

    fn pending_join_mut(&mut self, position: usize, verb: &str) -> Result<&mut PendingJoin> {
        self.pending_join.as_mut().ok_or_else(|| {
            QueryError::structural_at(
                verb,
                format!("call {position}"),
                "join clauses must follow join() or groupJoin()",
            )
        })
    }

    fn ordering(&mut self, position: usize, call: &Call) -> Result<OrderingParameters> {
        let function = self.function(position, call, 0)?;
        let direction = if call.verb.ends_with("Ascending") {
            Direction::Ascending
        } else if call.verb.ends_with("Descending") {
            Direction::Descending
        } else {
            match call.args.get(1) {
                Some(arg) => {
                    let constant = self.constant(position, call, 1, arg)?;
                    Direction::from_value(&constant).map_err(|err| {
                        QueryError::invalid_argument(call.verb.clone(), 1, err.to_string())
                    })?
                }
                None => Direction::Ascending,
            }
        };
        Ok(OrderingParameters {
            function,
            direction,
        })
    }

    fn argument<'c>(&self, call: &'c Call, index: usize) -> Result<&'c Expr> {
        call.args.get(index).ok_or_else(|| {
            QueryError::invalid_argument(call.verb.clone(), index, "missing required argument")
        })
    }

    /// Register a required function argument
    fn function(&mut self, position: usize, call: &Call, index: usize) -> Result<ParameterId> {
        let arg = self.argument(call, index)?.clone();
        self.register_function(position, call, index, arg)
    }

    /// Register a function argument; absent or literal `null` means none
    fn optional_function(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
    ) -> Result<Option<ParameterId>> {
        match call.args.get(index) {
            None => Ok(None),
            Some(arg) if matches!(arg.as_value(), Some(Value::Null)) => Ok(None),
            Some(arg) => self.register_function(position, call, index, arg.clone()).map(Some),
        }
    }

    /// Register a function argument
    ///
    /// A variable names a callable bound in the execution context.
    fn register_function(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
        arg: Expr,
    ) -> Result<ParameterId> {
        let accepted = match &*arg {
            Expression::ClosureDef(_) => true,
            Expression::Variable { .. } => arg.as_variable_name().is_some(),
            Expression::Value(Value::String(name)) => {
                self.builder.evaluator.functions().contains(name)
            }
            _ => false,
        };
        if !accepted {
            return Err(QueryError::invalid_argument(
                call.verb.clone(),
                index,
                format!(
                    "expected a closure, a callable variable or a registered function name, got {}",
                    arg.kind().name()
                ),
            ));
        }
        let id = parameter_id(position, &call.verb, index);
        self.parameters.add_runtime(id.clone(), ArgumentRole::Function, arg);
        Ok(id)
    }

    /// Register a required value argument
    fn value(&mut self, position: usize, call: &Call, index: usize) -> Result<ParameterId> {
        let arg = self.argument(call, index)?.clone();
        Ok(self.register_value(position, call, index, arg))
    }

    /// Register a value argument defaulting to `null`
    fn optional_value(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
    ) -> Result<ParameterId> {
        let arg = call
            .args
            .get(index)
            .cloned()
            .unwrap_or_else(|| Expression::value(Value::Null));
        Ok(self.register_value(position, call, index, arg))
    }

    /// Register a value argument only when it is given and not `null`
    fn optional_value_if_present(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
    ) -> Result<Option<ParameterId>> {
        match call.args.get(index) {
            None => Ok(None),
            Some(arg) if matches!(arg.as_value(), Some(Value::Null)) => Ok(None),
            Some(arg) => Ok(Some(self.register_value(position, call, index, arg.clone()))),
        }
    }

    fn register_value(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
        arg: Expr,
    ) -> ParameterId {
        let id = parameter_id(position, &call.verb, index);
        match self.builder.evaluator.constant_value(&arg) {
            Some(value) => self.parameters.add_structural(id.clone(), ArgumentRole::Value, value),
            None => self.parameters.add_runtime(id.clone(), ArgumentRole::Value, arg),
        }
        id
    }

    /// Reduce and register an argument that must be known at build time
    fn constant(
        &mut self,
        position: usize,
        call: &Call,
        index: usize,
        arg: &Expr,
    ) -> Result<Value> {
        let value = self
            .builder
            .evaluator
            .simplify_to_value(arg, &self.builder.context)
            .map_err(|err| {
                QueryError::invalid_argument(
                    call.verb.clone(),
                    index,
                    format!("argument must be a constant expression: {err}"),
                )
            })?;
        let id = parameter_id(position, &call.verb, index);
        self.parameters
            .add_structural(id, ArgumentRole::Constant, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOperator;
    use crate::query::ParameterValue;
    use pretty_assertions::assert_eq;

    fn chain(calls: &[(&str, Vec<Expr>)]) -> Expr {
        calls
            .iter()
            .fold(Expression::variable("people"), |value, (verb, args)| {
                Expression::method_call(value, verb, args.clone())
            })
    }

    fn adult_filter(age: i64) -> Expr {
        Expression::arrow(
            &["row"],
            Expression::binary(
                Expression::index(Expression::variable("row"), Some(Expression::value("age"))),
                BinaryOperator::GreaterThanOrEqual,
                Expression::value(age),
            ),
        )
    }

    fn build(calls: &[(&str, Vec<Expr>)]) -> Result<ParsedQuery> {
        QueryBuilder::default().build(&chain(calls))
    }

    #[test]
    fn test_parse_operations_and_request() {
        let parsed = build(&[
            ("where", vec![adult_filter(18)]),
            (
                "orderByDescending",
                vec![Expression::arrow(&["row"], Expression::variable("row"))],
            ),
            (
                "thenBy",
                vec![
                    Expression::arrow(&["row"], Expression::variable("row")),
                    Expression::value("asc"),
                ],
            ),
            ("take", vec![Expression::value(10)]),
            ("count", vec![]),
        ])
        .unwrap();

        let query = &parsed.query;
        assert_eq!(query.source, "people");
        assert_eq!(query.request, Request::Count);
        assert_eq!(query.operations.len(), 3);
        match &query.operations[1] {
            Operation::OrderBy { orderings } => {
                assert_eq!(orderings.len(), 2);
                assert_eq!(orderings[0].direction, Direction::Descending);
                assert_eq!(orderings[1].direction, Direction::Ascending);
            }
            other => panic!("expected orderBy, got {other:?}"),
        }
        assert_eq!(
            parsed.parameters.get("3-take-0").map(|p| p.value.clone()),
            Some(ParameterValue::Structural(Value::Int(10)))
        );
        assert!(!parsed.parameters.get("0-where-0").is_some_and(|p| p.is_structural()));
    }

    #[test]
    fn test_default_request_is_as_array() {
        let parsed = build(&[("unique", vec![])]).unwrap();
        assert_eq!(parsed.query.request, Request::AsArray);
    }

    #[test]
    fn test_runtime_constants_share_hash() {
        let a = build(&[("where", vec![adult_filter(18)])]).unwrap();
        let b = build(&[("where", vec![adult_filter(21)])]).unwrap();
        let c = build(&[
            ("where", vec![adult_filter(18)]),
            ("where", vec![adult_filter(65)]),
        ])
        .unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_structural_values_change_hash() {
        let a = build(&[("take", vec![Expression::value(5)])]).unwrap();
        let b = build(&[("take", vec![Expression::value(6)])]).unwrap();
        let c = build(&[("take", vec![Expression::variable("limit")])]).unwrap();
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert!(c.parameters.runtime().any(|(id, _)| id == "0-take-0"));
    }

    #[test]
    fn test_join_clauses() {
        let identity = || Expression::arrow(&["x"], Expression::variable("x"));
        let pair = Expression::arrow(
            &["outer", "inner"],
            Expression::list([Expression::variable("outer"), Expression::variable("inner")]),
        );
        let parsed = build(&[
            ("join", vec![Expression::variable("orders")]),
            ("onEquality", vec![identity(), identity()]),
            ("withDefault", vec![Expression::value(Value::Null)]),
            ("to", vec![pair]),
        ])
        .unwrap();
        match &parsed.query.operations[0] {
            Operation::Join(join) => {
                assert!(!join.grouped);
                assert!(matches!(join.condition, JoinCondition::OnEquality { .. }));
                assert_eq!(
                    join.default,
                    Some((
                        "2-withDefault-0".to_string(),
                        "2-withDefault-1".to_string()
                    ))
                );
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn test_structural_errors() {
        let identity = || Expression::arrow(&["x"], Expression::variable("x"));
        let cases: Vec<Vec<(&str, Vec<Expr>)>> = vec![
            vec![("thenBy", vec![identity()])],
            vec![("where", vec![identity()]), ("thenBy", vec![identity()])],
            vec![("on", vec![identity()])],
            vec![("join", vec![Expression::variable("other")]), ("where", vec![identity()])],
            vec![("join", vec![Expression::variable("other")])],
            vec![("count", vec![]), ("where", vec![identity()])],
            vec![("frobnicate", vec![])],
        ];
        for calls in cases {
            let err = build(&calls).unwrap_err();
            assert!(matches!(err, QueryError::StructuralParse { .. }), "{calls:?} gave {err:?}");
        }
    }

    #[test]
    fn test_invalid_arguments() {
        let err = build(&[("where", vec![])]).unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidOperationArgument { ref method, index: 0, .. } if method == "where"
        ));

        let err = build(&[("select", vec![Expression::value(3)])]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperationArgument { .. }));

        let err = build(&[(
            "orderBy",
            vec![
                Expression::arrow(&["x"], Expression::variable("x")),
                Expression::variable("direction"),
            ],
        )])
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperationArgument { index: 1, .. }));

        let dynamic_name = Expression::method_call_named(
            Expression::variable("people"),
            Expression::variable("verb"),
            Vec::<Expr>::new(),
        );
        let err = QueryBuilder::default().build(&dynamic_name).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperationArgument { .. }));
    }

    #[test]
    fn test_builtin_names_are_functions() {
        let parsed = build(&[("select", vec![Expression::value("strtoupper")])]).unwrap();
        assert_eq!(parsed.parameters.runtime().count(), 1);
        assert!(build(&[("select", vec![Expression::value("no_such_function")])]).is_err());
    }
}
