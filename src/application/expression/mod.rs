//! Expression evaluation for template documents.
//!
//! Three strategies (dotted paths, a declarative query language and sandboxed
//! Rhai scripts) sit behind [`ExpressionEvaluator`]. The
//! [`CompositeExpressionEvaluator`] routes by language tag and owns the
//! coercions renderers need.

mod composite;
mod path;
mod query;
mod script;
mod value;

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::types::ExpressionLanguage;

pub use composite::CompositeExpressionEvaluator;
pub use path::PathEvaluator;
pub use query::QueryEvaluator;
pub use script::ScriptEvaluator;
pub use value::{is_truthy, stringify};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("evaluation error: {0}")]
    Runtime(String),
    #[error("expression exceeded {limit} evaluation steps")]
    StepLimit { limit: usize },
    #[error("expression exceeded nesting depth {limit}")]
    DepthLimit { limit: usize },
    #[error("script exceeded its time budget")]
    Timeout,
    #[error("no evaluator registered for language `{0}`")]
    UnsupportedLanguage(&'static str),
    #[error("script error: {0}")]
    Script(String),
}

impl ExpressionError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Resource bounds applied to query and script evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionLimits {
    pub query_max_steps: usize,
    pub query_max_depth: usize,
    pub script_max_operations: u64,
    pub script_max_call_depth: usize,
    pub script_timeout_ms: u64,
}

impl Default for ExpressionLimits {
    fn default() -> Self {
        Self {
            query_max_steps: 5_000,
            query_max_depth: 100,
            script_max_operations: 100_000,
            script_max_call_depth: 32,
            script_timeout_ms: 1_000,
        }
    }
}

/// One expression language.
pub trait ExpressionEvaluator: Send + Sync {
    fn language(&self) -> ExpressionLanguage;

    fn try_evaluate(&self, raw: &str, context: &Value) -> Result<Value, ExpressionError>;

    /// Evaluate with `scope` keys shadowing the top-level keys of `data`.
    ///
    /// The default builds the merged object; evaluators that can resolve names
    /// against both layers should override it and skip the copy.
    fn try_evaluate_scoped(
        &self,
        raw: &str,
        data: &Value,
        scope: &Map<String, Value>,
    ) -> Result<Value, ExpressionError> {
        let mut merged = match data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in scope {
            merged.insert(key.clone(), value.clone());
        }
        self.try_evaluate(raw, &Value::Object(merged))
    }

    /// Like [`try_evaluate`](Self::try_evaluate) but failures read as `null`.
    fn evaluate(&self, raw: &str, context: &Value) -> Value {
        self.try_evaluate(raw, context).unwrap_or(Value::Null)
    }
}

/// Evaluators keyed by the language they implement.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<ExpressionLanguage, Arc<dyn ExpressionEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three built-in languages configured with `limits`.
    pub fn with_builtins(limits: ExpressionLimits) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PathEvaluator));
        registry.register(Arc::new(QueryEvaluator::new(
            limits.query_max_steps,
            limits.query_max_depth,
        )));
        registry.register(Arc::new(ScriptEvaluator::new(limits)));
        registry
    }

    /// Register `evaluator`, replacing any previous one for the same language.
    pub fn register(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.evaluators.insert(evaluator.language(), evaluator);
    }

    pub fn get(&self, language: ExpressionLanguage) -> Option<&Arc<dyn ExpressionEvaluator>> {
        self.evaluators.get(&language)
    }
}
