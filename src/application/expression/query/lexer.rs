use crate::application::expression::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Str(String),
    Name(String),
    /// `$name`; the bare `$` has an empty name and `$$` is `"$"`.
    Variable(String),
    Op(&'static str),
    And,
    Or,
    In,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

// Longest match first.
const OPERATORS: [&str; 23] = [
    "!=", "<=", ">=", "..", ".", "[", "]", "(", ")", "{", "}", ",", ":", "?", "+", "-", "*",
    "/", "%", "&", "=", "<", ">",
];

pub(super) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;

        if c == b'/' && bytes.get(pos + 1) == Some(&b'*') {
            let end = source[pos + 2..]
                .find("*/")
                .ok_or_else(|| ExpressionError::parse(start, "unterminated comment"))?;
            pos += end + 4;
            continue;
        }

        let token = match c {
            b'"' | b'\'' => {
                let (text, next) = read_string(source, pos)?;
                pos = next;
                Token::Str(text)
            }
            b'`' => {
                let end = source[pos + 1..]
                    .find('`')
                    .ok_or_else(|| ExpressionError::parse(start, "unterminated quoted name"))?;
                let name = source[pos + 1..pos + 1 + end].to_string();
                pos += end + 2;
                Token::Name(name)
            }
            b'0'..=b'9' => {
                let (number, next) = read_number(source, pos)?;
                pos = next;
                Token::Number(number)
            }
            b'$' => {
                pos += 1;
                if bytes.get(pos) == Some(&b'$') {
                    pos += 1;
                    Token::Variable("$".to_string())
                } else {
                    let end = scan_name(bytes, pos);
                    let name = source[pos..end].to_string();
                    pos = end;
                    Token::Variable(name)
                }
            }
            c if is_name_start(c) => {
                let end = scan_name(bytes, pos);
                let word = &source[pos..end];
                pos = end;
                match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Name(word.to_string()),
                }
            }
            _ => {
                let rest = &source[pos..];
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .copied()
                    .ok_or_else(|| {
                        let ch = rest.chars().next().unwrap_or('?');
                        ExpressionError::parse(start, format!("unexpected character `{ch}`"))
                    })?;
                pos += op.len();
                Token::Op(op)
            }
        };
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }
    Ok(tokens)
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn scan_name(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (is_name_start(bytes[pos]) || bytes[pos].is_ascii_digit()) {
        pos += 1;
    }
    pos
}

fn read_number(source: &str, start: usize) -> Result<(f64, usize), ExpressionError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    // `1..3` is a range, not a decimal point.
    if bytes.get(pos) == Some(&b'.') && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if matches!(bytes.get(pos), Some(b'e' | b'E')) {
        let mut exp = pos + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    source[start..pos]
        .parse::<f64>()
        .map(|number| (number, pos))
        .map_err(|err| ExpressionError::parse(start, format!("invalid number: {err}")))
}

fn read_string(source: &str, start: usize) -> Result<(String, usize), ExpressionError> {
    let mut chars = source[start..].char_indices();
    let quote = chars.next().map(|(_, c)| c).unwrap_or('"');
    let mut text = String::new();

    while let Some((index, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((text, start + index + c.len_utf8())),
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| ExpressionError::parse(start, "unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c => text.push(c),
        }
    }
    Err(ExpressionError::parse(start, "unterminated string"))
}
