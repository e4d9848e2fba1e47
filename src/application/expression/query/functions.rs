//! Built-in `$function`s of the query language.

use serde_json::Value;

use crate::application::expression::{
    ExpressionError,
    value::{is_truthy, number_value, stringify},
};

use super::eval::{compare, sequence, type_name, values_equal};

pub(super) fn call(name: &str, mut args: Vec<Value>) -> Result<Value, ExpressionError> {
    let first = if args.is_empty() {
        Value::Null
    } else {
        args.remove(0)
    };

    match name {
        "sum" => Ok(number_value(numbers(name, first)?.iter().sum())),
        "count" => Ok(Value::from(sequence(first).len())),
        "max" => Ok(numbers(name, first)?
            .into_iter()
            .reduce(f64::max)
            .map(number_value)
            .unwrap_or(Value::Null)),
        "min" => Ok(numbers(name, first)?
            .into_iter()
            .reduce(f64::min)
            .map(number_value)
            .unwrap_or(Value::Null)),
        "average" => {
            let values = numbers(name, first)?;
            if values.is_empty() {
                return Ok(Value::Null);
            }
            Ok(number_value(values.iter().sum::<f64>() / values.len() as f64))
        }
        "string" => Ok(match first {
            Value::Null => Value::Null,
            other => Value::String(stringify(&other)),
        }),
        "number" => match first {
            Value::Null => Ok(Value::Null),
            Value::Number(_) => Ok(first),
            Value::Bool(flag) => Ok(Value::from(u8::from(flag))),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(number_value)
                .ok_or_else(|| {
                    ExpressionError::runtime(format!("cannot convert `{text}` to a number"))
                }),
            other => Err(argument_error(name, "a number, string or boolean", &other)),
        },
        "boolean" => Ok(Value::Bool(is_truthy(&first))),
        "not" => Ok(Value::Bool(!is_truthy(&first))),
        "exists" => Ok(Value::Bool(!first.is_null())),
        "length" => match first {
            Value::String(text) => Ok(Value::from(text.chars().count())),
            other => Err(argument_error(name, "a string", &other)),
        },
        "uppercase" => map_string(name, first, |text| text.to_uppercase()),
        "lowercase" => map_string(name, first, |text| text.to_lowercase()),
        "trim" => map_string(name, first, |text| {
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        }),
        "substring" => {
            let Value::String(text) = first else {
                return null_or_error(name, "a string", first);
            };
            let start = optional_integer(args.first(), 0)?;
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len() as i64;
            let start = if start < 0 {
                len.saturating_add(start).max(0)
            } else {
                start.min(len)
            };
            let count = optional_integer(args.get(1), len)?.max(0);
            let end = start.saturating_add(count).min(len);
            Ok(Value::String(
                chars[start as usize..end as usize].iter().collect(),
            ))
        }
        "contains" => {
            let Value::String(text) = first else {
                return null_or_error(name, "a string", first);
            };
            match args.first() {
                Some(Value::String(pattern)) => Ok(Value::Bool(text.contains(pattern.as_str()))),
                Some(other) => Err(argument_error(name, "a string pattern", other)),
                None => Err(ExpressionError::runtime("$contains requires a pattern")),
            }
        }
        "join" => {
            let separator = match args.first() {
                Some(Value::String(separator)) => separator.as_str(),
                Some(other) => return Err(argument_error(name, "a string separator", other)),
                None => "",
            };
            let mut parts = Vec::new();
            for item in sequence(first) {
                match item {
                    Value::String(text) => parts.push(text),
                    other => return Err(argument_error(name, "an array of strings", &other)),
                }
            }
            Ok(Value::String(parts.join(separator)))
        }
        "split" => {
            let Value::String(text) = first else {
                return null_or_error(name, "a string", first);
            };
            let separator = match args.first() {
                Some(Value::String(separator)) => separator.clone(),
                Some(other) => return Err(argument_error(name, "a string separator", other)),
                None => return Err(ExpressionError::runtime("$split requires a separator")),
            };
            let parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(separator.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Value::Array(parts))
        }
        "round" => {
            let precision = optional_integer(args.first(), 0)?;
            numeric(name, first, |n| round_half_even(n, precision))
        }
        "abs" => numeric(name, first, f64::abs),
        "floor" => numeric(name, first, f64::floor),
        "ceil" => numeric(name, first, f64::ceil),
        "keys" => {
            let mut keys: Vec<Value> = Vec::new();
            for item in sequence(first) {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        let key = Value::String(key.clone());
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
            }
            Ok(Value::Array(keys))
        }
        "append" => {
            let second = args.into_iter().next().unwrap_or(Value::Null);
            if first.is_null() {
                return Ok(second);
            }
            if second.is_null() {
                return Ok(first);
            }
            let mut items = sequence(first);
            items.extend(sequence(second));
            Ok(Value::Array(items))
        }
        "reverse" => {
            let mut items = sequence(first);
            items.reverse();
            Ok(Value::Array(items))
        }
        "sort" => {
            let mut items = sequence(first);
            let comparable = items.windows(2).all(|pair| compare(&pair[0], &pair[1]).is_some());
            if !comparable {
                return Err(ExpressionError::runtime(
                    "$sort requires all numbers or all strings",
                ));
            }
            items.sort_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal));
            Ok(Value::Array(items))
        }
        "distinct" => {
            let mut unique: Vec<Value> = Vec::new();
            for item in sequence(first) {
                if !unique.iter().any(|seen| values_equal(seen, &item)) {
                    unique.push(item);
                }
            }
            Ok(Value::Array(unique))
        }
        unknown => Err(ExpressionError::runtime(format!(
            "unknown function `${unknown}`"
        ))),
    }
}

fn numbers(name: &str, value: Value) -> Result<Vec<f64>, ExpressionError> {
    sequence(value)
        .into_iter()
        .map(|item| {
            item.as_f64()
                .ok_or_else(|| argument_error(name, "an array of numbers", &item))
        })
        .collect()
}

fn numeric(name: &str, value: Value, op: impl Fn(f64) -> f64) -> Result<Value, ExpressionError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(number) => Ok(number_value(op(number.as_f64().unwrap_or(0.0)))),
        other => Err(argument_error(name, "a number", &other)),
    }
}

fn map_string(
    name: &str,
    value: Value,
    op: impl Fn(&str) -> String,
) -> Result<Value, ExpressionError> {
    match value {
        Value::String(text) => Ok(Value::String(op(&text))),
        other => null_or_error(name, "a string", other),
    }
}

fn null_or_error(name: &str, expected: &str, value: Value) -> Result<Value, ExpressionError> {
    match value {
        Value::Null => Ok(Value::Null),
        other => Err(argument_error(name, expected, &other)),
    }
}

fn optional_integer(value: Option<&Value>, default: i64) -> Result<i64, ExpressionError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        // Out-of-range arguments saturate; callers clamp to their own bounds.
        Some(Value::Number(number)) => Ok(number.as_f64().unwrap_or(0.0).trunc() as i64),
        Some(other) => Err(ExpressionError::runtime(format!(
            "expected an integer argument, found {}",
            type_name(other)
        ))),
    }
}

fn argument_error(name: &str, expected: &str, found: &Value) -> ExpressionError {
    ExpressionError::runtime(format!(
        "${name} expects {expected}, found {}",
        type_name(found)
    ))
}

/// Round to `precision` decimal places, ties to even.
fn round_half_even(value: f64, precision: i64) -> f64 {
    let factor = 10f64.powi(precision.clamp(-15, 15) as i32);
    let scaled = value * factor;
    let rounded = scaled.round();
    let result = if (scaled - scaled.trunc()).abs() == 0.5 {
        2.0 * (scaled / 2.0).round()
    } else {
        rounded
    };
    result / factor
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn aggregates_ignore_nothing_and_reject_strings() {
        assert_eq!(call("sum", vec![json!([1, 2, 3.5])]).unwrap(), json!(6.5));
        assert_eq!(call("sum", vec![Value::Null]).unwrap(), json!(0));
        assert_eq!(call("average", vec![json!([])]).unwrap(), Value::Null);
        assert!(call("max", vec![json!([1, "x"])]).is_err());
    }

    #[test]
    fn rounding_is_bankers() {
        assert_eq!(call("round", vec![json!(2.5)]).unwrap(), json!(2));
        assert_eq!(call("round", vec![json!(3.5)]).unwrap(), json!(4));
        assert_eq!(call("round", vec![json!(1.256), json!(2)]).unwrap(), json!(1.26));
    }

    #[test]
    fn substring_counts_characters() {
        assert_eq!(
            call("substring", vec![json!("héllo"), json!(1), json!(3)]).unwrap(),
            json!("éll")
        );
        assert_eq!(
            call("substring", vec![json!("hello"), json!(-2)]).unwrap(),
            json!("lo")
        );
    }

    #[test]
    fn substring_clamps_extreme_arguments() {
        assert_eq!(
            call("substring", vec![json!("abc"), json!(1), json!(1e19)]).unwrap(),
            json!("bc")
        );
        assert_eq!(
            call("substring", vec![json!("abc"), json!(-1e19), json!(2)]).unwrap(),
            json!("ab")
        );
        assert_eq!(
            call("substring", vec![json!("abc"), json!(1e19)]).unwrap(),
            json!("")
        );
        assert_eq!(
            call("substring", vec![json!("abc"), json!(1), json!(-5)]).unwrap(),
            json!("")
        );
    }

    #[test]
    fn rounding_tolerates_extreme_precision() {
        assert_eq!(call("round", vec![json!(1.5), json!(1e19)]).unwrap(), json!(1.5));
        assert_eq!(call("round", vec![json!(1.5), json!(-1e19)]).unwrap(), json!(0));
        assert_eq!(call("round", vec![json!(1e300), json!(15)]).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_functions_fail() {
        assert!(call("nope", vec![Value::Null]).is_err());
    }
}
