use serde_json::{Number, Value};

/// Boolean reading of an evaluated value. Empty strings, empty arrays, zero
/// and `null` are false; objects are always true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Text used when a value is interpolated into a string. `null` becomes empty.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// A JSON number, as an integer when `n` is integral and fits `i64`.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// `n` truncated toward zero, or `None` when it does not fit an `i64`.
pub(crate) fn truncate_to_i64(n: f64) -> Option<i64> {
    let n = n.trunc();
    (n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn truthiness_treats_empty_collections_as_false() {
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!([1])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!("no")));
    }

    #[test]
    fn integral_floats_become_integers() {
        assert_eq!(number_value(42.0), json!(42));
        assert_eq!(number_value(-3.0), json!(-3));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
        assert_eq!(number_value(1e300), json!(1e300));
    }

    #[test]
    fn stringify_renders_null_as_empty() {
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&json!(7)), "7");
        assert_eq!(stringify(&json!("x")), "x");
        assert_eq!(stringify(&json!([1, 2])), "[1,2]");
    }
}
