//! Sandboxed Rhai scripts.
//!
//! Each evaluation builds a fresh [`Engine`] with no module resolver, no `eval`,
//! muted `print`/`debug`, bounded operations and sizes, and a wall-clock budget.
//! Data reaches the script only through [`DataView`], which hands out a copy of
//! the child value on every property, index or iteration access.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rhai::{
    Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope,
    module_resolvers::DummyModuleResolver,
};
use serde_json::Value;

use crate::domain::types::ExpressionLanguage;

use super::{ExpressionError, ExpressionEvaluator, ExpressionLimits, value::number_value};

const MAX_STRING_SIZE: usize = 64 * 1024;
const MAX_ARRAY_SIZE: usize = 10_000;
const MAX_MAP_SIZE: usize = 10_000;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;

/// Read-only view of a JSON object or array inside a script.
#[derive(Debug, Clone)]
pub struct DataView(Arc<Value>);

impl DataView {
    fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    fn field(&mut self, key: ImmutableString) -> Dynamic {
        match self.0.as_ref() {
            Value::Object(map) => map.get(key.as_str()).map(to_dynamic).unwrap_or(Dynamic::UNIT),
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .map(to_dynamic)
                .unwrap_or(Dynamic::UNIT),
            _ => Dynamic::UNIT,
        }
    }

    fn index(&mut self, index: i64) -> Dynamic {
        let Value::Array(items) = self.0.as_ref() else {
            return Dynamic::UNIT;
        };
        let len = items.len() as i64;
        let index = if index < 0 { len + index } else { index };
        usize::try_from(index)
            .ok()
            .and_then(|index| items.get(index))
            .map(to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    }

    fn len(&mut self) -> i64 {
        match self.0.as_ref() {
            Value::Object(map) => map.len() as i64,
            Value::Array(items) => items.len() as i64,
            _ => 0,
        }
    }

    fn keys(&mut self) -> rhai::Array {
        match self.0.as_ref() {
            Value::Object(map) => map.keys().map(|key| Dynamic::from(key.clone())).collect(),
            _ => rhai::Array::new(),
        }
    }
}

impl IntoIterator for DataView {
    type Item = Dynamic;
    type IntoIter = std::vec::IntoIter<Dynamic>;

    fn into_iter(self) -> Self::IntoIter {
        let items: Vec<Dynamic> = match self.0.as_ref() {
            Value::Array(items) => items.iter().map(to_dynamic).collect(),
            Value::Object(map) => map.values().map(to_dynamic).collect(),
            _ => Vec::new(),
        };
        items.into_iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptEvaluator {
    limits: ExpressionLimits,
}

impl ScriptEvaluator {
    pub fn new(limits: ExpressionLimits) -> Self {
        Self { limits }
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine
            .set_module_resolver(DummyModuleResolver::new())
            .disable_symbol("eval")
            .on_print(|_| {})
            .on_debug(|_, _, _| {})
            .set_max_operations(self.limits.script_max_operations)
            .set_max_call_levels(self.limits.script_max_call_depth)
            .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH)
            .set_max_string_size(MAX_STRING_SIZE)
            .set_max_array_size(MAX_ARRAY_SIZE)
            .set_max_map_size(MAX_MAP_SIZE);

        let started = Instant::now();
        let budget = Duration::from_millis(self.limits.script_timeout_ms);
        engine.on_progress(move |_| (started.elapsed() > budget).then_some(Dynamic::UNIT));

        engine
            .register_type_with_name::<DataView>("DataView")
            .register_indexer_get(DataView::field)
            .register_indexer_get(DataView::index)
            .register_fn("len", DataView::len)
            .register_fn("keys", DataView::keys)
            .register_iterator::<DataView>();
        engine
    }
}

impl ExpressionEvaluator for ScriptEvaluator {
    fn language(&self) -> ExpressionLanguage {
        ExpressionLanguage::Script
    }

    fn try_evaluate(&self, raw: &str, context: &Value) -> Result<Value, ExpressionError> {
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        let engine = self.engine();
        let mut scope = scope_for(context);
        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, raw)
            .map_err(|err| classify(*err, &self.limits))?;
        Ok(to_json(result))
    }
}

/// `data` is the whole context; top-level keys that are identifiers are also
/// bound directly. `$`-prefixed loop keys are bound without the sigil unless
/// that name is already taken.
fn scope_for(context: &Value) -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push_constant_dynamic("data", to_dynamic(context));

    if let Value::Object(map) = context {
        for (key, value) in map {
            if is_identifier(key) {
                scope.push_constant_dynamic(key.clone(), to_dynamic(value));
            }
        }
        for (key, value) in map {
            if let Some(bare) = key.strip_prefix('$')
                && is_identifier(bare)
                && !map.contains_key(bare)
            {
                scope.push_constant_dynamic(bare.to_string(), to_dynamic(value));
            }
        }
    }
    scope
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify(err: EvalAltResult, limits: &ExpressionLimits) -> ExpressionError {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => classify(*inner, limits),
        EvalAltResult::ErrorTooManyOperations(_) => ExpressionError::StepLimit {
            limit: usize::try_from(limits.script_max_operations).unwrap_or(usize::MAX),
        },
        EvalAltResult::ErrorStackOverflow(_) => ExpressionError::DepthLimit {
            limit: limits.script_max_call_depth,
        },
        EvalAltResult::ErrorTerminated(_, _) => ExpressionError::Timeout,
        EvalAltResult::ErrorParsing(kind, position) => {
            ExpressionError::parse(offset(position), kind.to_string())
        }
        other => ExpressionError::Script(other.to_string()),
    }
}

fn offset(position: Position) -> usize {
    position.position().unwrap_or(0)
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(flag) => Dynamic::from_bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Dynamic::from_int(int),
            None => Dynamic::from_float(number.as_f64().unwrap_or(0.0)),
        },
        Value::String(text) => Dynamic::from(text.clone()),
        Value::Array(_) | Value::Object(_) => Dynamic::from(DataView::new(value.clone())),
    }
}

/// Convert a script result to JSON. Floats that hold an exact `i64` become integers.
fn to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(flag) = value.as_bool() {
        return Value::Bool(flag);
    }
    if let Ok(int) = value.as_int() {
        return Value::from(int);
    }
    if let Ok(float) = value.as_float() {
        return number_value(float);
    }
    if let Ok(c) = value.as_char() {
        return Value::String(c.to_string());
    }
    if value.is_string() {
        return Value::String(value.into_string().unwrap_or_default());
    }
    if value.is::<DataView>() {
        return value
            .try_cast::<DataView>()
            .map(|view| view.0.as_ref().clone())
            .unwrap_or(Value::Null);
    }
    if value.is_array() {
        return value
            .into_array()
            .map(|items| Value::Array(items.into_iter().map(to_json).collect()))
            .unwrap_or(Value::Null);
    }
    if value.is_map() {
        return value
            .try_cast::<rhai::Map>()
            .map(|map| {
                Value::Object(
                    map.into_iter()
                        .map(|(key, value)| (key.to_string(), to_json(value)))
                        .collect(),
                )
            })
            .unwrap_or(Value::Null);
    }
    Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn script() -> ScriptEvaluator {
        ScriptEvaluator::new(ExpressionLimits::default())
    }

    #[test]
    fn property_paths_read_through_views() {
        let data = json!({"a": {"b": {"c": 42}}});
        assert_eq!(script().evaluate("a.b.c", &data), json!(42));
        assert_eq!(script().evaluate("data.a.b", &data), json!({"c": 42}));
        assert_eq!(script().evaluate("a.missing", &data), Value::Null);
    }

    #[test]
    fn scripts_iterate_arrays() {
        let data = json!({"items": [{"price": 12, "qty": 2}, {"price": 5, "qty": 1}]});
        let total = script().evaluate(
            "let total = 0; for item in items { total += item.price * item.qty; } total",
            &data,
        );
        assert_eq!(total, json!(29));
        assert_eq!(script().evaluate("items.len()", &data), json!(2));
        assert_eq!(script().evaluate("items[-1].price", &data), json!(5));
    }

    #[test]
    fn numbers_are_normalised() {
        let data = json!({});
        assert_eq!(script().evaluate("2.0 * 21", &data), json!(42));
        assert_eq!(script().evaluate("10.0 / 4", &data), json!(2.5));
        assert_eq!(script().evaluate("#{n: 1, s: \"x\"}", &data), json!({"n": 1, "s": "x"}));
    }

    #[test]
    fn loop_sigils_are_bound_without_prefix() {
        let data = json!({"$first": true, "$index": 3});
        assert_eq!(script().evaluate("first && index == 3", &data), json!(true));
    }

    #[test]
    fn sandbox_rejects_eval_and_imports() {
        let data = json!({});
        assert!(script().try_evaluate("eval(\"1 + 1\")", &data).is_err());
        assert!(script().try_evaluate("import \"std\" as s; 1", &data).is_err());
    }

    #[test]
    fn runaway_scripts_are_stopped() {
        let data = json!({});
        assert!(matches!(
            script().try_evaluate("loop { }", &data),
            Err(ExpressionError::StepLimit { .. })
        ));

        let timed = ScriptEvaluator::new(ExpressionLimits {
            script_max_operations: 0,
            script_timeout_ms: 5,
            ..ExpressionLimits::default()
        });
        assert_eq!(
            timed.try_evaluate("loop { }", &data),
            Err(ExpressionError::Timeout)
        );

        assert!(script().try_evaluate("fn f(x) { f(x) } f(1)", &data).is_err());
    }
}
