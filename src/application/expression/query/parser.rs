use serde_json::Value;

use crate::application::expression::{ExpressionError, value::number_value};

use super::lexer::{Spanned, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl BinaryOp {
    pub(super) fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Literal(Value),
    /// Field lookup against the current context item.
    Name(String),
    Variable(String),
    /// `lhs.rhs`: evaluate `rhs` once per item of `lhs` and flatten.
    Path(Box<Expr>, Box<Expr>),
    /// `lhs[predicate]`: index or filter the items of `lhs`.
    Filter(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Condition {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Range(Box<Expr>, Box<Expr>),
    Object(Vec<(Expr, Expr)>),
    Block(Box<Expr>),
}

const BP_CONDITION: u8 = 20;
const BP_PATH: u8 = 75;
const BP_FILTER: u8 = 80;
const BP_UNARY: u8 = 70;

pub(super) fn parse(tokens: Vec<Spanned>, max_depth: usize) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.expression(0)?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::parse(
            extra.offset,
            format!("unexpected {:?} after expression", extra.token),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|spanned| spanned.offset)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Result<Token, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|spanned| spanned.token.clone())
            .ok_or_else(|| ExpressionError::parse(self.offset(), "unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(found)) if *found == op) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, op: &str) -> Result<(), ExpressionError> {
        if self.eat(op) {
            return Ok(());
        }
        Err(ExpressionError::parse(
            self.offset(),
            format!("expected `{op}`"),
        ))
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExpressionError::DepthLimit {
                limit: self.max_depth,
            });
        }
        let result = self.expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn expression_inner(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(bp) = self.peek().and_then(infix_binding_power) else {
                break;
            };
            if bp <= min_bp {
                break;
            }
            let token = self.next()?;
            lhs = match token {
                Token::Op(".") => Expr::Path(Box::new(lhs), Box::new(self.expression(BP_PATH)?)),
                Token::Op("[") => {
                    let predicate = self.expression(0)?;
                    self.expect("]")?;
                    Expr::Filter(Box::new(lhs), Box::new(predicate))
                }
                Token::Op("?") => {
                    let then = self.expression(0)?;
                    let otherwise = if self.eat(":") {
                        Some(Box::new(self.expression(BP_CONDITION - 1)?))
                    } else {
                        None
                    };
                    Expr::Condition {
                        test: Box::new(lhs),
                        then: Box::new(then),
                        otherwise,
                    }
                }
                other => {
                    let op = binary_op(&other).ok_or_else(|| {
                        ExpressionError::parse(self.offset(), format!("unexpected {other:?}"))
                    })?;
                    Expr::Binary(op, Box::new(lhs), Box::new(self.expression(bp)?))
                }
            };
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.offset();
        match self.next()? {
            Token::Number(number) => Ok(Expr::Literal(number_value(number))),
            Token::Str(text) => Ok(Expr::Literal(Value::String(text))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Name(name) => Ok(Expr::Name(name)),
            Token::Variable(name) => {
                if !self.eat("(") {
                    return Ok(Expr::Variable(name));
                }
                let args = self.list(")", |parser| parser.expression(0))?;
                Ok(Expr::Call { name, args })
            }
            Token::Op("-") => Ok(Expr::Negate(Box::new(self.expression(BP_UNARY)?))),
            Token::Op("(") => {
                let inner = self.expression(0)?;
                self.expect(")")?;
                Ok(Expr::Block(Box::new(inner)))
            }
            Token::Op("[") => {
                let items = self.list("]", |parser| {
                    let item = parser.expression(0)?;
                    if parser.eat("..") {
                        let end = parser.expression(0)?;
                        return Ok(Expr::Range(Box::new(item), Box::new(end)));
                    }
                    Ok(item)
                })?;
                Ok(Expr::Array(items))
            }
            Token::Op("{") => {
                let pairs = self.list("}", |parser| {
                    let key = parser.expression(0)?;
                    parser.expect(":")?;
                    let value = parser.expression(0)?;
                    Ok((key, value))
                })?;
                Ok(Expr::Object(pairs))
            }
            other => Err(ExpressionError::parse(
                offset,
                format!("unexpected {other:?}"),
            )),
        }
    }

    /// Comma-separated items up to and including `close`.
    fn list<T>(
        &mut self,
        close: &str,
        mut item: impl FnMut(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<Vec<T>, ExpressionError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }
}

fn infix_binding_power(token: &Token) -> Option<u8> {
    let bp = match token {
        Token::Op(".") => BP_PATH,
        Token::Op("[") => BP_FILTER,
        Token::Op("?") => BP_CONDITION,
        Token::Or => 25,
        Token::And => 30,
        Token::In | Token::Op("=" | "!=" | "<" | "<=" | ">" | ">=") => 40,
        Token::Op("+" | "-" | "&") => 50,
        Token::Op("*" | "/" | "%") => 60,
        _ => return None,
    };
    Some(bp)
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::And => BinaryOp::And,
        Token::Or => BinaryOp::Or,
        Token::In => BinaryOp::In,
        Token::Op("+") => BinaryOp::Add,
        Token::Op("-") => BinaryOp::Sub,
        Token::Op("*") => BinaryOp::Mul,
        Token::Op("/") => BinaryOp::Div,
        Token::Op("%") => BinaryOp::Mod,
        Token::Op("&") => BinaryOp::Concat,
        Token::Op("=") => BinaryOp::Eq,
        Token::Op("!=") => BinaryOp::Ne,
        Token::Op("<") => BinaryOp::Lt,
        Token::Op("<=") => BinaryOp::Le,
        Token::Op(">") => BinaryOp::Gt,
        Token::Op(">=") => BinaryOp::Ge,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(source: &str) -> Result<Expr, ExpressionError> {
        parse(tokenize(source)?, 100)
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn predicates_bind_tighter_than_paths() {
        let expr = parse_str("order.items[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Path(
                name("order"),
                Box::new(Expr::Filter(name("items"), Box::new(Expr::Literal(json!(0)))))
            )
        );
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let expr = parse_str("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                name("a"),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    name("b"),
                    Box::new(Expr::Literal(json!(2)))
                ))
            )
        );
    }

    #[test]
    fn ternary_without_else_is_allowed() {
        let expr = parse_str("vip ? 'gold'").unwrap();
        assert!(matches!(expr, Expr::Condition { otherwise: None, .. }));
    }

    #[test]
    fn rejects_trailing_tokens_and_runaway_nesting() {
        assert!(matches!(
            parse_str("a b"),
            Err(ExpressionError::Parse { .. })
        ));
        let nested = format!("{}1{}", "(".repeat(150), ")".repeat(150));
        assert_eq!(
            parse_str(&nested),
            Err(ExpressionError::DepthLimit { limit: 100 })
        );
    }
}
