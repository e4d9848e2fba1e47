use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::application::expression::{
    ExpressionError,
    value::{is_truthy, number_value, stringify, truncate_to_i64},
};

use super::{
    functions,
    parser::{BinaryOp, Expr},
};

/// Largest range a `[a..b]` constructor may expand to.
const MAX_RANGE_LEN: i64 = 10_000_000;

/// Execution budget for one evaluation.
pub(super) struct Frame<'a> {
    root: &'a Value,
    steps: usize,
    max_steps: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Frame<'a> {
    pub(super) fn new(root: &'a Value, max_steps: usize, max_depth: usize) -> Self {
        Self {
            root,
            steps: 0,
            max_steps,
            depth: 0,
            max_depth,
        }
    }

    pub(super) fn tick(&mut self) -> Result<(), ExpressionError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ExpressionError::StepLimit {
                limit: self.max_steps,
            });
        }
        Ok(())
    }

    pub(super) fn eval(&mut self, expr: &Expr, ctx: &Value) -> Result<Value, ExpressionError> {
        self.tick()?;
        self.depth += 1;
        if self.depth > self.max_depth {
            self.depth -= 1;
            return Err(ExpressionError::DepthLimit {
                limit: self.max_depth,
            });
        }
        let result = self.eval_inner(expr, ctx);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, ctx: &Value) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => Ok(lookup(ctx, name)),
            Expr::Variable(name) => Ok(match name.as_str() {
                "" => ctx.clone(),
                "$" => self.root.clone(),
                other => self
                    .root
                    .get(format!("${other}"))
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
            Expr::Path(lhs, rhs) => {
                let base = self.eval(lhs, ctx)?;
                let mut out = Vec::new();
                for item in sequence(base) {
                    match self.eval(rhs, &item)? {
                        Value::Null => {}
                        Value::Array(values) => out.extend(values),
                        value => out.push(value),
                    }
                }
                Ok(collapse(out))
            }
            Expr::Filter(lhs, predicate) => {
                let base = self.eval(lhs, ctx)?;
                self.filter(sequence(base), predicate)
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, ctx),
            Expr::Negate(inner) => match self.eval(inner, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Number(number) => Ok(number_value(-number.as_f64().unwrap_or(0.0))),
                other => Err(ExpressionError::runtime(format!(
                    "cannot negate {}",
                    type_name(&other)
                ))),
            },
            Expr::Condition {
                test,
                then,
                otherwise,
            } => {
                if is_truthy(&self.eval(test, ctx)?) {
                    self.eval(then, ctx)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise, ctx),
                        None => Ok(Value::Null),
                    }
                }
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len().max(1));
                for arg in args {
                    values.push(self.eval(arg, ctx)?);
                }
                if values.is_empty() {
                    values.push(ctx.clone());
                }
                functions::call(name, values)
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Expr::Range(start, end) => self.range(start, end, ctx, &mut out)?,
                        Expr::Path(..) | Expr::Name(_) | Expr::Filter(..) => {
                            match self.eval(item, ctx)? {
                                Value::Null => {}
                                Value::Array(values) => out.extend(values),
                                value => out.push(value),
                            }
                        }
                        other => match self.eval(other, ctx)? {
                            Value::Null => {}
                            value => out.push(value),
                        },
                    }
                }
                Ok(Value::Array(out))
            }
            Expr::Range(start, end) => {
                let mut out = Vec::new();
                self.range(start, end, ctx, &mut out)?;
                Ok(Value::Array(out))
            }
            Expr::Object(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    let key = match self.eval(key, ctx)? {
                        Value::String(key) => key,
                        other => {
                            return Err(ExpressionError::runtime(format!(
                                "object keys must be strings, found {}",
                                type_name(&other)
                            )));
                        }
                    };
                    map.insert(key, self.eval(value, ctx)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Block(inner) => self.eval(inner, ctx),
        }
    }

    fn filter(&mut self, items: Vec<Value>, predicate: &Expr) -> Result<Value, ExpressionError> {
        let len = items.len() as i64;
        let mut out = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let verdict = self.eval(predicate, &item)?;
            let keep = match &verdict {
                Value::Number(number) => {
                    let wanted = number.as_f64().unwrap_or(f64::NAN).floor() as i64;
                    let wanted = if wanted < 0 { len + wanted } else { wanted };
                    wanted == index as i64
                }
                other => is_truthy(other),
            };
            if keep {
                out.push(item);
            }
        }
        Ok(collapse(out))
    }

    fn range(
        &mut self,
        start: &Expr,
        end: &Expr,
        ctx: &Value,
        out: &mut Vec<Value>,
    ) -> Result<(), ExpressionError> {
        let start = integer(&self.eval(start, ctx)?, "range start")?;
        let end = integer(&self.eval(end, ctx)?, "range end")?;
        if end
            .checked_sub(start)
            .is_none_or(|span| span > MAX_RANGE_LEN)
        {
            return Err(ExpressionError::runtime("range is too large"));
        }
        for value in start..=end {
            self.tick()?;
            out.push(Value::from(value));
        }
        Ok(())
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        ctx: &Value,
    ) -> Result<Value, ExpressionError> {
        match op {
            BinaryOp::And => {
                let left = is_truthy(&self.eval(lhs, ctx)?);
                return Ok(Value::Bool(left && is_truthy(&self.eval(rhs, ctx)?)));
            }
            BinaryOp::Or => {
                let left = is_truthy(&self.eval(lhs, ctx)?);
                return Ok(Value::Bool(left || is_truthy(&self.eval(rhs, ctx)?)));
            }
            _ => {}
        }

        let left = self.eval(lhs, ctx)?;
        let right = self.eval(rhs, ctx)?;

        match op {
            BinaryOp::Concat => Ok(Value::String(stringify(&left) + stringify(&right).as_str())),
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
            BinaryOp::In => Ok(Value::Bool(
                sequence(right)
                    .iter()
                    .any(|candidate| values_equal(&left, candidate)),
            )),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                if left.is_null() || right.is_null() {
                    return Ok(Value::Bool(false));
                }
                let ordering = compare(&left, &right).ok_or_else(|| {
                    ExpressionError::runtime(format!(
                        "cannot compare {} with {} using `{}`",
                        type_name(&left),
                        type_name(&right),
                        op.symbol()
                    ))
                })?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            _ => arithmetic(op, &left, &right),
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ExpressionError::runtime(format!(
            "operands of `{}` must be numbers, found {} and {}",
            op.symbol(),
            type_name(left),
            type_name(right)
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(ExpressionError::runtime("division by zero"));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(ExpressionError::runtime("not an arithmetic operator")),
    };
    if !result.is_finite() {
        return Err(ExpressionError::runtime("numeric overflow"));
    }
    Ok(number_value(result))
}

fn integer(value: &Value, what: &str) -> Result<i64, ExpressionError> {
    value
        .as_f64()
        .filter(|n| n.fract() == 0.0)
        .and_then(truncate_to_i64)
        .ok_or_else(|| ExpressionError::runtime(format!("{what} must be an integer")))
}

/// Field `name` of `ctx`, mapped over arrays.
fn lookup(ctx: &Value, name: &str) -> Value {
    match ctx {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                match lookup(item, name) {
                    Value::Null => {}
                    Value::Array(values) => out.extend(values),
                    value => out.push(value),
                }
            }
            collapse(out)
        }
        _ => Value::Null,
    }
}

/// Treat a value as a sequence: arrays are their items, `null` is empty.
pub(super) fn sequence(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Empty sequences are `null` and singletons are their only item.
fn collapse(mut items: Vec<Value>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 => items.pop().unwrap_or(Value::Null),
        _ => Value::Array(items),
    }
}

pub(super) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

pub(super) fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
