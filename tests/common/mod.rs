//! Shared helpers for building call chains in integration tests

#![allow(dead_code)]

use deferq::Value;
use deferq::ast::{BinaryOperator, Expr, Expression};

/// `$source->verb(args)->...`
pub fn chain(source: &str, calls: Vec<(&str, Vec<Expr>)>) -> Expr {
    calls
        .into_iter()
        .fold(Expression::variable(source), |target, (verb, args)| {
            Expression::method_call(target, verb, args)
        })
}

/// `fn($p) => $p <op> constant`
pub fn compare(parameter: &str, op: BinaryOperator, constant: impl Into<Value>) -> Expr {
    Expression::arrow(
        &[parameter],
        Expression::binary(Expression::variable(parameter), op, Expression::value(constant)),
    )
}

/// `fn($p) => $p`
pub fn identity(parameter: &str) -> Expr {
    Expression::arrow(&[parameter], Expression::variable(parameter))
}

/// `fn($row) => $row[field]`
pub fn field(field: &str) -> Expr {
    Expression::arrow(
        &["row"],
        Expression::index(Expression::variable("row"), Some(Expression::value(field))),
    )
}

/// List of integers
pub fn ints(items: impl IntoIterator<Item = i64>) -> Value {
    Value::list(items.into_iter().map(Value::Int))
}

/// Values of an array result in order
pub fn values(result: &Value) -> Vec<Value> {
    result
        .as_array()
        .map(|map| map.values().cloned().collect())
        .unwrap_or_default()
}

/// Keys of an array result in order
pub fn keys(result: &Value) -> Vec<Value> {
    result
        .as_array()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// A row with `name` and `age` entries
pub fn person(name: &str, age: i64) -> Value {
    Value::array(
        [(Value::from("name"), Value::from(name)), (Value::from("age"), Value::Int(age))]
            .into_iter()
            .collect(),
    )
}
