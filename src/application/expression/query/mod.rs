//! Declarative JSON query language.
//!
//! Paths map over arrays and flatten (`orders.items.price`), predicates filter
//! or index (`items[price > 10]`, `items[-1]`), and `$functions` aggregate.
//! Every evaluation runs inside a [`eval::Frame`] that caps the number of
//! evaluation steps and the nesting depth.

mod eval;
mod functions;
mod lexer;
mod parser;

use serde_json::Value;

use crate::domain::types::ExpressionLanguage;

use super::{ExpressionError, ExpressionEvaluator};

#[derive(Debug, Clone, Copy)]
pub struct QueryEvaluator {
    max_steps: usize,
    max_depth: usize,
}

impl QueryEvaluator {
    pub fn new(max_steps: usize, max_depth: usize) -> Self {
        Self {
            max_steps,
            max_depth,
        }
    }
}

impl ExpressionEvaluator for QueryEvaluator {
    fn language(&self) -> ExpressionLanguage {
        ExpressionLanguage::Query
    }

    fn try_evaluate(&self, raw: &str, context: &Value) -> Result<Value, ExpressionError> {
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        let tokens = lexer::tokenize(raw)?;
        let expr = parser::parse(tokens, self.max_depth)?;
        eval::Frame::new(context, self.max_steps, self.max_depth).eval(&expr, context)
    }
}
