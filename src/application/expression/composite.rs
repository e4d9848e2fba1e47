use metrics::counter;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{expression::Expression, types::ExpressionLanguage};

use super::{
    EvaluatorRegistry, ExpressionError, ExpressionLimits,
    value::{is_truthy, stringify},
};

const METRIC_EXPRESSION_FAILURES: &str = "quire_expression_failures_total";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Routes expressions to the evaluator registered for their language and
/// applies the coercions renderers rely on.
///
/// Failures of any kind read as `null`. They are logged at `debug` and counted
/// per language so a broken template is still visible in telemetry.
#[derive(Clone)]
pub struct CompositeExpressionEvaluator {
    registry: EvaluatorRegistry,
}

impl CompositeExpressionEvaluator {
    pub fn new(registry: EvaluatorRegistry) -> Self {
        Self { registry }
    }

    pub fn with_limits(limits: ExpressionLimits) -> Self {
        Self::new(EvaluatorRegistry::with_builtins(limits))
    }

    /// Evaluate with typed failures. `loop_ctx` keys win over `data` keys.
    pub fn try_evaluate(
        &self,
        expression: &Expression,
        data: &Value,
        loop_ctx: Option<&Map<String, Value>>,
    ) -> Result<Value, ExpressionError> {
        if expression.is_blank() {
            return Ok(Value::Null);
        }
        let evaluator = self
            .registry
            .get(expression.language)
            .ok_or(ExpressionError::UnsupportedLanguage(
                expression.language.as_str(),
            ))?;
        match loop_ctx.filter(|scope| !scope.is_empty()) {
            Some(scope) => evaluator.try_evaluate_scoped(&expression.raw, data, scope),
            None => evaluator.try_evaluate(&expression.raw, data),
        }
    }

    pub fn evaluate(
        &self,
        expression: &Expression,
        data: &Value,
        loop_ctx: Option<&Map<String, Value>>,
    ) -> Value {
        match self.try_evaluate(expression, data, loop_ctx) {
            Ok(value) => value,
            Err(err) => {
                record_failure(expression.language, &expression.raw, &err);
                Value::Null
            }
        }
    }

    pub fn evaluate_condition(
        &self,
        expression: &Expression,
        data: &Value,
        loop_ctx: Option<&Map<String, Value>>,
    ) -> bool {
        is_truthy(&self.evaluate(expression, data, loop_ctx))
    }

    /// Items to iterate. Anything other than an array yields no items.
    pub fn evaluate_iterable(
        &self,
        expression: &Expression,
        data: &Value,
        loop_ctx: Option<&Map<String, Value>>,
    ) -> Vec<Value> {
        match self.evaluate(expression, data, loop_ctx) {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    /// Replace every `{{expr}}` in `template` with its stringified value.
    ///
    /// Placeholders are path expressions unless `language` says otherwise. An
    /// unterminated `{{` is kept as literal text.
    pub fn process_template(
        &self,
        template: &str,
        language: ExpressionLanguage,
        data: &Value,
        loop_ctx: Option<&Map<String, Value>>,
    ) -> String {
        if !template.contains(OPEN) {
            return template.to_string();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            let expression = Expression::new(after_open[..end].trim(), language);
            out.push_str(&stringify(&self.evaluate(&expression, data, loop_ctx)));
            rest = &after_open[end + CLOSE.len()..];
        }
        out.push_str(rest);
        out
    }
}

fn record_failure(language: ExpressionLanguage, raw: &str, err: &ExpressionError) {
    debug!(
        target = "application::expression",
        language = language.as_str(),
        expression = raw,
        error = %err,
        "expression evaluation failed; using null"
    );
    counter!(METRIC_EXPRESSION_FAILURES, "language" => language.as_str()).increment(1);
}
