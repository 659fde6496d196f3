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

//! Standard pure builtins

use std::cmp::Ordering;

use super::function::FunctionRegistry;
use crate::ast::{BinaryOperator, CastType};
use crate::error::{QueryError, Result};
use crate::evaluator::operators::{
    Number, apply_binary, apply_cast, loose_compare, loose_equals, to_number,
};
use crate::model::{OrderedMap, Value};

/// Register every standard builtin
pub fn register_standard(registry: &mut FunctionRegistry) {
    registry.register("strlen", 1, Some(1), |args| {
        Ok(Value::from(string_arg("strlen", &args[0])?.len()))
    });
    registry.register("strtoupper", 1, Some(1), |args| {
        Ok(Value::from(string_arg("strtoupper", &args[0])?.to_uppercase()))
    });
    registry.register("strtolower", 1, Some(1), |args| {
        Ok(Value::from(string_arg("strtolower", &args[0])?.to_lowercase()))
    });
    registry.register("strval", 1, Some(1), |args| apply_cast(CastType::String, &args[0]));
    registry.register("intval", 1, Some(2), intval);
    registry.register("is_null", 1, Some(1), |args| Ok(Value::Bool(args[0].is_null())));

    registry.register("abs", 1, Some(1), |args| {
        Ok(match to_number(&args[0], "abs")? {
            Number::Int(i) => i.checked_abs().map_or(Value::Float((i as f64).abs()), Value::Int),
            Number::Float(f) => Value::Float(f.abs()),
        })
    });
    registry.register("floor", 1, Some(1), |args| {
        Ok(Value::Float(float_arg("floor", &args[0])?.floor()))
    });
    registry.register("ceil", 1, Some(1), |args| {
        Ok(Value::Float(float_arg("ceil", &args[0])?.ceil()))
    });
    registry.register("round", 1, Some(2), round);

    registry.register("count", 1, Some(1), |args| match &args[0] {
        Value::Array(map) => Ok(Value::from(map.len())),
        other => Err(QueryError::type_mismatch(
            "array",
            other.type_name(),
            Some("count()".to_string()),
        )),
    });
    registry.register("max", 1, None, |args| extreme("max", args, Ordering::Greater));
    registry.register("min", 1, None, |args| extreme("min", args, Ordering::Less));
    registry.register("array_sum", 1, Some(1), |args| {
        array_arg("array_sum", &args[0])?
            .values()
            .try_fold(Value::Int(0), |sum, value| apply_binary(BinaryOperator::Add, &sum, value))
    });
    registry.register("in_array", 2, Some(3), |args| {
        let strict = args.get(2).is_some_and(Value::is_truthy);
        let found = array_arg("in_array", &args[1])?.values().any(|candidate| {
            if strict {
                candidate == &args[0]
            } else {
                loose_equals(candidate, &args[0])
            }
        });
        Ok(Value::Bool(found))
    });
    registry.register("implode", 1, Some(2), implode);
}

fn string_arg(function: &str, value: &Value) -> Result<String> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(QueryError::type_mismatch(
            "string",
            value.type_name(),
            Some(format!("{function}()")),
        )),
        other => Ok(other.to_string()),
    }
}

fn float_arg(function: &str, value: &Value) -> Result<f64> {
    Ok(match to_number(value, function)? {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    })
}

fn array_arg<'a>(function: &str, value: &'a Value) -> Result<&'a OrderedMap> {
    value.as_array().ok_or_else(|| {
        QueryError::type_mismatch("array", value.type_name(), Some(format!("{function}()")))
    })
}

fn intval(args: &[Value]) -> Result<Value> {
    let base = args.get(1).and_then(Value::as_int).unwrap_or(10);
    match (&args[0], base) {
        (Value::String(s), base) if base != 10 => {
            let digits = s.trim();
            let (negative, digits) = match digits.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, digits.strip_prefix('+').unwrap_or(digits)),
            };
            let radix = u32::try_from(base).ok().filter(|b| (2..=36).contains(b)).ok_or_else(|| {
                QueryError::invalid_argument("intval", 1, format!("base {base} is out of range"))
            })?;
            let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
            let parsed = i64::from_str_radix(&valid, radix).unwrap_or(0);
            Ok(Value::Int(if negative { -parsed } else { parsed }))
        }
        (value, _) => apply_cast(CastType::Int, value),
    }
}

fn round(args: &[Value]) -> Result<Value> {
    let value = float_arg("round", &args[0])?;
    let precision = args.get(1).and_then(Value::as_int).unwrap_or(0);
    let precision = i32::try_from(precision.clamp(-308, 308)).unwrap_or(0);
    let factor = 10f64.powi(precision);
    // f64::round rounds half away from zero.
    Ok(Value::Float((value * factor).round() / factor))
}

fn extreme(function: &str, args: &[Value], wanted: Ordering) -> Result<Value> {
    let candidates: Vec<&Value> = match args {
        [Value::Array(map)] => map.values().collect(),
        [single] => {
            return Err(QueryError::type_mismatch(
                "array",
                single.type_name(),
                Some(format!("{function}()")),
            ));
        }
        many => many.iter().collect(),
    };
    let mut best: Option<&Value> = None;
    for candidate in candidates {
        best = match best {
            Some(current) if loose_compare(candidate, current)? != Some(wanted) => Some(current),
            _ => Some(candidate),
        };
    }
    best.cloned().ok_or_else(|| {
        QueryError::invalid_argument(function, 0, "must contain at least one element")
    })
}

fn implode(args: &[Value]) -> Result<Value> {
    let (separator, pieces) = match args {
        [pieces] => (String::new(), pieces),
        [Value::Array(_), separator] => (string_arg("implode", separator)?, &args[0]),
        [separator, pieces] => (string_arg("implode", separator)?, pieces),
        _ => {
            return Err(QueryError::invalid_argument(
                "implode",
                args.len(),
                "expects 1-2 arguments",
            ));
        }
    };
    let parts = array_arg("implode", pieces)?
        .values()
        .map(|piece| string_arg("implode", piece))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::from(parts.join(&separator)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn call(name: &str, args: &[Value]) -> Value {
        FunctionRegistry::standard().call(name, args).unwrap()
    }

    #[rstest]
    #[case("strlen", vec![Value::from("héllo")], Value::Int(6))]
    #[case("strtoupper", vec![Value::from("abc")], Value::from("ABC"))]
    #[case("abs", vec![Value::Int(-3)], Value::Int(3))]
    #[case("floor", vec![Value::Float(2.7)], Value::Float(2.0))]
    #[case("round", vec![Value::Float(2.5)], Value::Float(3.0))]
    #[case("round", vec![Value::Float(1.2345), Value::Int(2)], Value::Float(1.23))]
    #[case("intval", vec![Value::from("ff"), Value::Int(16)], Value::Int(255))]
    #[case("is_null", vec![Value::Null], Value::Bool(true))]
    fn test_scalar_builtins(#[case] name: &str, #[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(call(name, &args), expected);
    }

    #[test]
    fn test_collection_builtins() {
        let list = Value::list([Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(call("count", &[list.clone()]), Value::Int(3));
        assert_eq!(call("max", &[list.clone()]), Value::Int(3));
        assert_eq!(call("min", &[Value::Int(5), Value::Int(-1)]), Value::Int(-1));
        assert_eq!(call("array_sum", &[list.clone()]), Value::Int(6));
        assert_eq!(call("in_array", &[Value::from("2"), list.clone()]), Value::Bool(true));
        assert_eq!(
            call("in_array", &[Value::from("2"), list.clone(), Value::Bool(true)]),
            Value::Bool(false)
        );
        assert_eq!(call("implode", &[Value::from(","), list]), Value::from("3,1,2"));
    }

    #[test]
    fn test_max_of_empty_array_fails() {
        let registry = FunctionRegistry::standard();
        assert!(registry.call("max", &[Value::list([])]).is_err());
    }
}
