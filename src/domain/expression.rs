//! Expressions embedded in template documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::ExpressionLanguage;

/// Raw expression text tagged with the language that evaluates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub raw: String,
    #[serde(default)]
    pub language: ExpressionLanguage,
}

impl Expression {
    pub fn new(raw: impl Into<String>, language: ExpressionLanguage) -> Self {
        Self {
            raw: raw.into(),
            language,
        }
    }

    pub fn path(raw: impl Into<String>) -> Self {
        Self::new(raw, ExpressionLanguage::Path)
    }

    /// Read an expression from a node prop. Bare strings are path expressions;
    /// objects must carry `raw` and may carry `language`.
    pub fn from_prop(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Some(Self::path(raw.clone())),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bare_strings_are_path_expressions() {
        let expression = Expression::from_prop(&json!("customer.name")).unwrap();
        assert_eq!(expression, Expression::path("customer.name"));
    }

    #[test]
    fn objects_carry_their_language() {
        let expression =
            Expression::from_prop(&json!({"raw": "$sum(items.price)", "language": "query"}))
                .unwrap();
        assert_eq!(expression.language, ExpressionLanguage::Query);

        let defaulted = Expression::from_prop(&json!({"raw": "a.b"})).unwrap();
        assert_eq!(defaulted.language, ExpressionLanguage::Path);
    }

    #[test]
    fn other_values_are_not_expressions() {
        assert!(Expression::from_prop(&json!(42)).is_none());
        assert!(Expression::from_prop(&json!({"language": "query"})).is_none());
    }
}
