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

//! Structural validation of expression trees
//!
//! Control constructs (`return`, `throw`, `unset`) are statements: they may
//! only appear directly in a body. Array items belong to array literals and
//! parameters to closure parameter lists.

use super::expression::{Expr, Expression, ExpressionKind};
use crate::error::{QueryError, Result};

/// Validate an expression used where a value is required
pub fn validate_expression(expr: &Expr) -> Result<()> {
    check(expr, Place::Value, "expression")
}

/// Validate a statement sequence (closure or function body)
pub fn validate_body(body: &[Expr]) -> Result<()> {
    body.iter().enumerate().try_for_each(|(index, statement)| {
        check(statement, Place::Statement, &format!("statement {index}"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Value,
    Statement,
    ArrayItem,
    Parameter,
}

fn check(expr: &Expr, place: Place, position: &str) -> Result<()> {
    let kind = expr.kind();
    let misplaced = |message: &str| Err(QueryError::structural_at(kind.name(), position, message));

    if kind.is_control() && place != Place::Statement {
        return misplaced("control construct is only valid as a statement");
    }
    match (kind, place) {
        (ExpressionKind::ArrayItem, Place::ArrayItem)
        | (ExpressionKind::Parameter, Place::Parameter) => {}
        (ExpressionKind::ArrayItem, _) => return misplaced("array item outside an array literal"),
        (ExpressionKind::Parameter, _) => return misplaced("parameter outside a parameter list"),
        (_, Place::ArrayItem) => return misplaced("array literal entries must be array items"),
        (_, Place::Parameter) => return misplaced("parameter list entries must be parameters"),
        _ => {}
    }

    match &**expr {
        Expression::ArrayLiteral { items } => {
            items.iter().enumerate().try_for_each(|(index, item)| {
                check(item, Place::ArrayItem, &format!("{position}, item {index}"))
            })
        }
        Expression::ClosureDef(data) => {
            data.parameters.iter().enumerate().try_for_each(|(index, parameter)| {
                check(parameter, Place::Parameter, &format!("{position}, parameter {index}"))
            })?;
            data.body.iter().enumerate().try_for_each(|(index, statement)| {
                check(statement, Place::Statement, &format!("{position}, statement {index}"))
            })
        }
        _ => expr
            .children()
            .into_iter()
            .try_for_each(|child| check(child, Place::Value, position)),
    }
}
