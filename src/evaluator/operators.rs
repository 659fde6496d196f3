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

//! Native operator semantics with the host's loose coercion rules

use std::cmp::Ordering;

use crate::ast::{BinaryOperator, CastType, UnaryOperator};
use crate::error::{QueryError, Result};
use crate::model::{OrderedMap, Value};

/// Numeric operand after coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integer operand
    Int(i64),
    /// Float operand
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
        }
    }
}

/// Parse a fully numeric string (surrounding whitespace allowed)
pub fn parse_numeric(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::Int(i));
    }
    let looks_numeric = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if looks_numeric {
        trimmed.parse::<f64>().ok().map(Number::Float)
    } else {
        None
    }
}

/// Parse the longest numeric prefix of a string (`"12 apples"` gives 12)
fn parse_leading_numeric(s: &str) -> Option<Number> {
    let trimmed = s.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(position, c)| {
            c.is_ascii_digit()
                || matches!(c, '.' | 'e' | 'E')
                || (*position == 0 && matches!(c, '+' | '-'))
        })
        .map(|(position, c)| position + c.len_utf8())
        .last()?;
    (1..=end)
        .rev()
        .find_map(|length| trimmed.get(..length).and_then(parse_numeric))
}

/// Coerce an operand to a number for arithmetic
pub fn to_number(value: &Value, operator: &str) -> Result<Number> {
    match value {
        Value::Null => Ok(Number::Int(0)),
        Value::Bool(b) => Ok(Number::Int(i64::from(*b))),
        Value::Int(i) => Ok(Number::Int(*i)),
        Value::Float(f) => Ok(Number::Float(*f)),
        Value::String(s) => parse_numeric(s)
            .or_else(|| parse_leading_numeric(s))
            .ok_or_else(|| {
                QueryError::type_mismatch(
                    "numeric value",
                    value.describe(),
                    Some(format!("operator '{operator}'")),
                )
            }),
        Value::Array(_) | Value::Object(_) => Err(QueryError::type_mismatch(
            "number",
            value.type_name(),
            Some(format!("operator '{operator}'")),
        )),
    }
}

fn float_to_int(f: f64) -> i64 {
    if f.is_finite() { f as i64 } else { 0 }
}

/// Integer conversion (`(int)` cast rules)
pub fn to_int(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Bool(b) => i64::from(*b),
        Value::Int(i) => *i,
        Value::Float(f) => float_to_int(*f),
        Value::String(s) => match parse_numeric(s).or_else(|| parse_leading_numeric(s)) {
            Some(Number::Int(i)) => i,
            Some(Number::Float(f)) => float_to_int(f),
            None => 0,
        },
        Value::Array(map) => i64::from(!map.is_empty()),
        Value::Object(_) => 1,
    }
}

/// Float conversion (`(float)` cast rules)
pub fn to_float(value: &Value) -> f64 {
    match value {
        Value::Float(f) => *f,
        Value::String(s) => parse_numeric(s)
            .or_else(|| parse_leading_numeric(s))
            .map_or(0.0, Number::as_f64),
        other => to_int(other) as f64,
    }
}

fn int_operand(value: &Value, operator: &str) -> Result<i64> {
    Ok(match to_number(value, operator)? {
        Number::Int(i) => i,
        Number::Float(f) => float_to_int(f),
    })
}

/// Loose (`==`) equality
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == other.is_truthy(),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Null, other) | (other, Value::Null) => !other.is_truthy(),
        (Value::String(a), Value::String(b)) => match (parse_numeric(a), parse_numeric(b)) {
            (Some(x), Some(y)) => numbers_equal(x, y),
            _ => a == b,
        },
        (Value::Int(_) | Value::Float(_), Value::String(s))
        | (Value::String(s), Value::Int(_) | Value::Float(_)) => {
            let number = if matches!(left, Value::String(_)) { right } else { left };
            match parse_numeric(s) {
                Some(parsed) => to_number(number, "==").is_ok_and(|n| numbers_equal(n, parsed)),
                None => number.to_string() == **s,
            }
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match (to_number(left, "=="), to_number(right, "==")) {
                (Ok(x), Ok(y)) => numbers_equal(x, y),
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key)
                        .is_some_and(|other| loose_equals(value, other))
                })
        }
        (Value::Object(a), Value::Object(b)) => {
            a.class == b.class
                && a.properties.len() == b.properties.len()
                && a.properties.iter().all(|(key, value)| {
                    b.properties
                        .get(key)
                        .is_some_and(|other| loose_equals(value, other))
                })
        }
        _ => false,
    }
}

fn numbers_equal(x: Number, y: Number) -> bool {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => a == b,
        _ => x.as_f64() == y.as_f64(),
    }
}

fn compare_numbers(x: Number, y: Number) -> Option<Ordering> {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        _ => x.as_f64().partial_cmp(&y.as_f64()),
    }
}

/// Loose ordering used by `<`, `<=`, `>`, `>=` and `<=>`
///
/// Returns `None` when the operands are unordered (NaN involved).
pub fn loose_compare(left: &Value, right: &Value) -> Result<Option<Ordering>> {
    Ok(match (left, right) {
        (Value::Bool(_) | Value::Null, _) | (_, Value::Bool(_) | Value::Null)
            if !matches!(
                (left, right),
                (Value::Null, Value::String(_)) | (Value::String(_), Value::Null)
            ) =>
        {
            Some(left.is_truthy().cmp(&right.is_truthy()))
        }
        (Value::Null, Value::String(s)) => Some(if s.is_empty() {
            Ordering::Equal
        } else {
            Ordering::Less
        }),
        (Value::String(s), Value::Null) => Some(if s.is_empty() {
            Ordering::Equal
        } else {
            Ordering::Greater
        }),
        (Value::String(a), Value::String(b)) => match (parse_numeric(a), parse_numeric(b)) {
            (Some(x), Some(y)) => compare_numbers(x, y),
            _ => Some(a.cmp(b)),
        },
        (Value::Int(_) | Value::Float(_), Value::String(s)) => match parse_numeric(s) {
            Some(parsed) => compare_numbers(to_number(left, "<=>")?, parsed),
            None => Some(left.to_string().as_str().cmp(&**s)),
        },
        (Value::String(s), Value::Int(_) | Value::Float(_)) => match parse_numeric(s) {
            Some(parsed) => compare_numbers(parsed, to_number(right, "<=>")?),
            None => Some((**s).cmp(right.to_string().as_str())),
        },
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            compare_numbers(to_number(left, "<=>")?, to_number(right, "<=>")?)
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return Ok(Some(a.len().cmp(&b.len())));
            }
            for (key, value) in a.iter() {
                let Some(other) = b.get(key) else {
                    return Ok(None);
                };
                match loose_compare(value, other)? {
                    Some(Ordering::Equal) => continue,
                    unequal => return Ok(unequal),
                }
            }
            Some(Ordering::Equal)
        }
        (Value::Array(_), _) => Some(Ordering::Greater),
        (_, Value::Array(_)) => Some(Ordering::Less),
        _ => {
            return Err(QueryError::type_mismatch(
                "comparable operands",
                format!("{} and {}", left.type_name(), right.type_name()),
                Some("comparison".to_string()),
            ));
        }
    })
}

fn checked_or_float(
    left: Number,
    right: Number,
    checked: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    match (left, right) {
        (Number::Int(a), Number::Int(b)) => match checked(a, b) {
            Some(result) => Value::Int(result),
            None => Value::Float(float(a as f64, b as f64)),
        },
        _ => Value::Float(float(left.as_f64(), right.as_f64())),
    }
}

/// Apply an eagerly evaluated binary operator
///
/// Short-circuit operators (`&&`, `||`, `??`) are handled by the evaluator;
/// applied here they act on already evaluated operands.
pub fn apply_binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    let symbol = op.symbol();
    Ok(match op {
        BinaryOperator::Add => {
            if let (Value::Array(a), Value::Array(b)) = (left, right) {
                let mut union = (**a).clone();
                for (key, value) in b.iter() {
                    if !union.contains_key(key) {
                        union.insert(key.clone(), value.clone());
                    }
                }
                return Ok(Value::array(union));
            }
            checked_or_float(
                to_number(left, symbol)?,
                to_number(right, symbol)?,
                i64::checked_add,
                |a, b| a + b,
            )
        }
        BinaryOperator::Subtract => {
            checked_or_float(
                to_number(left, symbol)?,
                to_number(right, symbol)?,
                i64::checked_sub,
                |a, b| a - b,
            )
        }
        BinaryOperator::Multiply => {
            checked_or_float(
                to_number(left, symbol)?,
                to_number(right, symbol)?,
                i64::checked_mul,
                |a, b| a * b,
            )
        }
        BinaryOperator::Divide => {
            let (x, y) = (to_number(left, symbol)?, to_number(right, symbol)?);
            if y.as_f64() == 0.0 {
                return Err(QueryError::arithmetic(symbol, "Division by zero"));
            }
            match (x, y) {
                (Number::Int(a), Number::Int(b)) if a.checked_rem(b) == Some(0) => {
                    a.checked_div(b).map_or(Value::Float(a as f64 / b as f64), Value::Int)
                }
                _ => Value::Float(x.as_f64() / y.as_f64()),
            }
        }
        BinaryOperator::Modulo => {
            let (a, b) = (int_operand(left, symbol)?, int_operand(right, symbol)?);
            if b == 0 {
                return Err(QueryError::arithmetic(symbol, "Modulo by zero"));
            }
            Value::Int(a.checked_rem(b).unwrap_or(0))
        }
        BinaryOperator::Power => {
            let (x, y) = (to_number(left, symbol)?, to_number(right, symbol)?);
            match (x, y) {
                (Number::Int(base), Number::Int(exponent)) if exponent >= 0 => {
                    u32::try_from(exponent)
                        .ok()
                        .and_then(|e| base.checked_pow(e))
                        .map_or_else(
                            || Value::Float((base as f64).powf(exponent as f64)),
                            Value::Int,
                        )
                }
                _ => Value::Float(x.as_f64().powf(y.as_f64())),
            }
        }
        BinaryOperator::Concat => {
            Value::from(format!("{}{}", string_operand(left)?, string_operand(right)?))
        }
        BinaryOperator::BitwiseAnd => {
            Value::Int(int_operand(left, symbol)? & int_operand(right, symbol)?)
        }
        BinaryOperator::BitwiseOr => {
            Value::Int(int_operand(left, symbol)? | int_operand(right, symbol)?)
        }
        BinaryOperator::BitwiseXor => {
            Value::Int(int_operand(left, symbol)? ^ int_operand(right, symbol)?)
        }
        BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight => {
            let (a, b) = (int_operand(left, symbol)?, int_operand(right, symbol)?);
            if b < 0 {
                return Err(QueryError::arithmetic(symbol, "Bit shift by negative number"));
            }
            let shifted = match (op, u32::try_from(b).ok().filter(|b| *b < 64)) {
                (BinaryOperator::ShiftLeft, Some(b)) => a << b,
                (_, Some(b)) => a >> b,
                (BinaryOperator::ShiftLeft, None) => 0,
                (_, None) => if a < 0 { -1 } else { 0 },
            };
            Value::Int(shifted)
        }
        BinaryOperator::LogicalAnd => Value::Bool(left.is_truthy() && right.is_truthy()),
        BinaryOperator::LogicalOr => Value::Bool(left.is_truthy() || right.is_truthy()),
        BinaryOperator::LogicalXor => Value::Bool(left.is_truthy() ^ right.is_truthy()),
        BinaryOperator::Equality => Value::Bool(loose_equals(left, right)),
        BinaryOperator::Inequality => Value::Bool(!loose_equals(left, right)),
        BinaryOperator::Identity => Value::Bool(left == right),
        BinaryOperator::NotIdentical => Value::Bool(left != right),
        BinaryOperator::LessThan => {
            Value::Bool(loose_compare(left, right)? == Some(Ordering::Less))
        }
        BinaryOperator::LessThanOrEqual => Value::Bool(matches!(
            loose_compare(left, right)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOperator::GreaterThan => {
            Value::Bool(loose_compare(left, right)? == Some(Ordering::Greater))
        }
        BinaryOperator::GreaterThanOrEqual => Value::Bool(matches!(
            loose_compare(left, right)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOperator::Spaceship => Value::Int(match loose_compare(left, right)? {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) | None => 1,
        }),
        BinaryOperator::NullCoalesce => {
            if left.is_null() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOperator::InstanceOf => match (left, right) {
            (Value::Object(object), Value::String(class)) => {
                Value::Bool(object.class.eq_ignore_ascii_case(class.trim_start_matches('\\')))
            }
            (Value::Object(object), Value::Object(other)) => {
                Value::Bool(object.class == other.class)
            }
            (_, Value::String(_) | Value::Object(_)) => Value::Bool(false),
            _ => {
                return Err(QueryError::type_mismatch(
                    "class name or object",
                    right.type_name(),
                    Some("instanceof".to_string()),
                ));
            }
        },
    })
}

fn string_operand(value: &Value) -> Result<String> {
    match value {
        Value::Object(object) => Err(QueryError::type_mismatch(
            "string",
            format!("object of class {}", object.class),
            Some("string conversion".to_string()),
        )),
        other => Ok(other.to_string()),
    }
}

/// Apply a unary operator
pub fn apply_unary(op: UnaryOperator, operand: &Value) -> Result<Value> {
    let symbol = op.symbol();
    Ok(match op {
        UnaryOperator::Not => Value::Bool(!operand.is_truthy()),
        UnaryOperator::Plus => to_number(operand, symbol)?.into_value(),
        UnaryOperator::Negate => match to_number(operand, symbol)? {
            Number::Int(i) => i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Int),
            Number::Float(f) => Value::Float(-f),
        },
        UnaryOperator::BitwiseNot => match operand {
            Value::Int(_) | Value::Float(_) => Value::Int(!to_int(operand)),
            _ => {
                return Err(QueryError::type_mismatch(
                    "int or float",
                    operand.type_name(),
                    Some(format!("operator '{symbol}'")),
                ));
            }
        },
    })
}

/// Apply a cast
pub fn apply_cast(cast_type: CastType, value: &Value) -> Result<Value> {
    Ok(match cast_type {
        CastType::Int => Value::Int(to_int(value)),
        CastType::Float => Value::Float(to_float(value)),
        CastType::String => Value::from(string_operand(value)?),
        CastType::Bool => Value::Bool(value.is_truthy()),
        CastType::Array => match value {
            Value::Null => Value::list([]),
            Value::Array(_) => value.clone(),
            Value::Object(object) => Value::array(object.properties.clone()),
            scalar => Value::list([scalar.clone()]),
        },
        CastType::Object => match value {
            Value::Object(_) => value.clone(),
            Value::Null => Value::object("stdClass", OrderedMap::new()),
            Value::Array(map) => Value::object("stdClass", (**map).clone()),
            scalar => {
                let mut properties = OrderedMap::new();
                properties.insert(Value::from("scalar"), scalar.clone());
                Value::object("stdClass", properties)
            }
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Int(2), Value::Int(3), Value::Int(5))]
    #[case(Value::from("2"), Value::Int(3), Value::Int(5))]
    #[case(Value::Float(0.5), Value::Bool(true), Value::Float(1.5))]
    #[case(Value::Int(i64::MAX), Value::Int(1), Value::Float(i64::MAX as f64 + 1.0))]
    #[case(Value::Null, Value::Int(4), Value::Int(4))]
    fn test_addition_coercion(#[case] left: Value, #[case] right: Value, #[case] expected: Value) {
        assert_eq!(apply_binary(BinaryOperator::Add, &left, &right).unwrap(), expected);
    }

    #[test]
    fn test_division_results() {
        assert_eq!(
            apply_binary(BinaryOperator::Divide, &Value::Int(6), &Value::Int(3)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            apply_binary(BinaryOperator::Divide, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Float(3.5)
        );
        assert!(matches!(
            apply_binary(BinaryOperator::Divide, &Value::Int(1), &Value::Int(0)),
            Err(QueryError::Arithmetic { .. })
        ));
        assert!(matches!(
            apply_binary(BinaryOperator::Modulo, &Value::Int(1), &Value::Int(0)),
            Err(QueryError::Arithmetic { .. })
        ));
    }

    #[rstest]
    #[case(Value::Int(1), Value::from("1"), true)]
    #[case(Value::Null, Value::Bool(false), true)]
    #[case(Value::Null, Value::from(""), true)]
    #[case(Value::from("abc"), Value::Int(0), false)]
    #[case(Value::from("1e1"), Value::from("10"), true)]
    #[case(Value::Int(1), Value::Float(1.0), true)]
    fn test_loose_equality(#[case] left: Value, #[case] right: Value, #[case] expected: bool) {
        assert_eq!(loose_equals(&left, &right), expected);
    }

    #[test]
    fn test_concat_and_comparison() {
        assert_eq!(
            apply_binary(BinaryOperator::Concat, &Value::from("a"), &Value::Int(1)).unwrap(),
            Value::from("a1")
        );
        assert_eq!(
            apply_binary(BinaryOperator::Spaceship, &Value::Int(1), &Value::Float(2.5)).unwrap(),
            Value::Int(-1)
        );
        assert_eq!(
            apply_binary(BinaryOperator::Identity, &Value::Int(1), &Value::Float(1.0)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_casts() {
        assert_eq!(apply_cast(CastType::Int, &Value::from("12 apples")).unwrap(), Value::Int(12));
        assert_eq!(apply_cast(CastType::Bool, &Value::from("0")).unwrap(), Value::Bool(false));
        assert_eq!(
            apply_cast(CastType::Array, &Value::Int(3)).unwrap(),
            Value::list([Value::Int(3)])
        );
        assert_eq!(apply_cast(CastType::String, &Value::Float(1.5)).unwrap(), Value::from("1.5"));
    }

    #[test]
    fn test_unary_negate_overflow_promotes() {
        assert_eq!(
            apply_unary(UnaryOperator::Negate, &Value::Int(i64::MIN)).unwrap(),
            Value::Float(-(i64::MIN as f64))
        );
        assert_eq!(apply_unary(UnaryOperator::Not, &Value::list([])).unwrap(), Value::Bool(true));
    }
}
