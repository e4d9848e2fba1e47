use serde_json::{Map, Value};

use crate::domain::types::ExpressionLanguage;

use super::{ExpressionError, ExpressionEvaluator};

/// Dotted property paths: `customer.address.city`, `items.0.price` or `items[0].price`.
///
/// A segment that does not resolve yields `null`; only malformed paths are errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

impl ExpressionEvaluator for PathEvaluator {
    fn language(&self) -> ExpressionLanguage {
        ExpressionLanguage::Path
    }

    fn try_evaluate(&self, raw: &str, context: &Value) -> Result<Value, ExpressionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        Ok(walk(context, &segments(raw)?).cloned().unwrap_or(Value::Null))
    }

    /// Resolves the first segment in `scope` before `data`; neither is copied.
    fn try_evaluate_scoped(
        &self,
        raw: &str,
        data: &Value,
        scope: &Map<String, Value>,
    ) -> Result<Value, ExpressionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Value::Null);
        }
        let segments = segments(raw)?;
        let resolved = match segments.split_first() {
            Some((Segment::Key(key), rest)) if scope.contains_key(key.as_str()) => {
                scope.get(key.as_str()).and_then(|value| walk(value, rest))
            }
            _ if data.is_object() => walk(data, &segments),
            _ => None,
        };
        Ok(resolved.cloned().unwrap_or(Value::Null))
    }
}

fn walk<'v>(mut current: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key.as_str()),
            (Segment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|index| items.get(index))
            }
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        }?;
    }
    Some(current)
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn segments(raw: &str) -> Result<Vec<Segment>, ExpressionError> {
    let mut out = Vec::new();
    let mut offset = 0;
    for part in raw.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(open) => part.split_at(open),
            None => (part, ""),
        };
        let name = name.trim();
        if name.is_empty() && rest.is_empty() {
            return Err(ExpressionError::parse(offset, "empty path segment"));
        }
        if !name.is_empty() {
            out.push(Segment::Key(name.to_string()));
        }
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| ExpressionError::parse(offset, "unterminated index"))?;
            let index = stripped[..close].trim().parse::<usize>().map_err(|_| {
                ExpressionError::parse(offset, format!("invalid index `{}`", &stripped[..close]))
            })?;
            out.push(Segment::Index(index));
            rest = &stripped[close + 1..];
        }
        if !rest.trim().is_empty() {
            return Err(ExpressionError::parse(
                offset,
                format!("unexpected `{rest}` in path segment"),
            ));
        }
        offset += part.len() + 1;
    }
    Ok(out)
}
