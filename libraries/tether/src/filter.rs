//! Filter expressions, in the dialect the record store understands: `status = "valid" && (used > "2024-01-01" || account = "abc")`.
//!
//! The synchronizers treat filters as opaque strings and hand them to the source. This module exists so a source that
//! keeps records locally (see `memory`) can evaluate them against JSON documents.
//!
//! Supported: comparisons `=`, `!=`, `>`, `>=`, `<`, `<=`, `~` (contains, case-insensitive), `!~` (does not contain),
//! combined with `&&` and `||` (`&&` binds tighter), parentheses, dotted field paths, and string, number, `true`,
//! `false` and `null` literals. Strings that both look like timestamps are compared as instants.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("unexpected character {found:?} at {position}")]
    UnexpectedChar { position: usize, found: char },
    #[error("unterminated string starting at {position}")]
    UnterminatedString { position: usize },
    #[error("invalid number {text:?} at {position}")]
    InvalidNumber { position: usize, text: String },
    #[error("unexpected {found} at {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("unexpected end of filter")]
    UnexpectedEnd,
    #[error("parentheses nested deeper than {limit} at {position}", limit = MAX_NESTING)]
    TooDeep { position: usize },
}

/// Deepest parenthesis nesting the parser accepts.
pub const MAX_NESTING: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Field(Vec<String>),
    Literal(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// The empty filter.
    Always,
    Compare(Operand, Op, Operand),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(Filter::Always);
        }
        let mut parser = Parser {
            tokens,
            cursor: 0,
            depth: 0,
        };
        let filter = parser.or()?;
        match parser.tokens.get(parser.cursor) {
            None => Ok(filter),
            Some((position, token)) => Err(FilterError::UnexpectedToken {
                position: *position,
                found: token.to_string(),
            }),
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Always => true,
            Filter::And(left, right) => left.matches(document) && right.matches(document),
            Filter::Or(left, right) => left.matches(document) || right.matches(document),
            Filter::Compare(left, op, right) => {
                let left = left.resolve(document);
                let right = right.resolve(document);
                compare(&left, *op, &right)
            }
        }
    }
}

impl Operand {
    fn resolve(&self, document: &Value) -> Value {
        match self {
            Operand::Literal(value) => value.clone(),
            Operand::Field(path) => path
                .iter()
                .try_fold(document, |value, segment| value.get(segment))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

fn compare(left: &Value, op: Op, right: &Value) -> bool {
    match op {
        Op::Eq => loosely_equal(left, right),
        Op::NotEq => !loosely_equal(left, right),
        Op::Gt => ordering(left, right) == Some(Ordering::Greater),
        Op::Gte => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Op::Lt => ordering(left, right) == Some(Ordering::Less),
        Op::Lte => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        Op::Like => contains(left, right),
        Op::NotLike => !contains(left, right),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        // the store doesn't distinguish a missing string from an empty one
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (a, b) => a == b,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(a.cmp(b)),
        },
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(haystack), Value::String(needle)) => haystack
            .to_lowercase()
            .contains(&needle.to_lowercase()),
        (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
        _ => false,
    }
}

/// Reads a timestamp in RFC 3339 or in the store's own `2024-01-01 10:00:00.000Z` format.
pub fn parse_timestamp(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Wraps a value in double quotes for use inside a filter expression.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(Op),
    And,
    Or,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier {name:?}"),
            Token::Str(text) => write!(f, "string {text:?}"),
            Token::Num(number) => write!(f, "number {number}"),
            Token::Op(op) => write!(f, "operator {op:?}"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, FilterError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&(position, c)) = chars.get(i) {
        let next = chars.get(i + 1).map(|&(_, c)| c);
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' | ')' => {
                tokens.push((position, if c == '(' { Token::LParen } else { Token::RParen }));
                i += 1;
            }
            '&' | '|' => {
                if next != Some(c) {
                    return Err(FilterError::UnexpectedChar { position, found: c });
                }
                tokens.push((position, if c == '&' { Token::And } else { Token::Or }));
                i += 2;
            }
            '=' | '~' => {
                tokens.push((position, Token::Op(if c == '=' { Op::Eq } else { Op::Like })));
                i += 1;
            }
            '!' | '>' | '<' => {
                let (op, width) = match (c, next) {
                    ('!', Some('=')) => (Op::NotEq, 2),
                    ('!', Some('~')) => (Op::NotLike, 2),
                    ('>', Some('=')) => (Op::Gte, 2),
                    ('<', Some('=')) => (Op::Lte, 2),
                    ('>', _) => (Op::Gt, 1),
                    ('<', _) => (Op::Lt, 1),
                    _ => return Err(FilterError::UnexpectedChar { position, found: c }),
                };
                tokens.push((position, Token::Op(op)));
                i += width;
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(FilterError::UnterminatedString { position }),
                        Some(&(_, '\\')) => {
                            if let Some(&(_, escaped)) = chars.get(j + 1) {
                                text.push(escaped);
                            }
                            j += 2;
                        }
                        Some(&(_, ch)) if ch == quote => break,
                        Some(&(_, ch)) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push((position, Token::Str(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|&(_, ch)| ch.is_ascii_digit() || ch == '.')
                {
                    j += 1;
                }
                let end = chars.get(j).map(|&(p, _)| p).unwrap_or(input.len());
                let text = &input[position..end];
                let number = text.parse::<f64>().map_err(|_| FilterError::InvalidNumber {
                    position,
                    text: text.to_string(),
                })?;
                tokens.push((position, Token::Num(number)));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' || c == '@' => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|&(_, ch)| ch.is_alphanumeric() || ch == '_' || ch == '.')
                {
                    j += 1;
                }
                let end = chars.get(j).map(|&(p, _)| p).unwrap_or(input.len());
                tokens.push((position, Token::Ident(input[position..end].to_string())));
                i = j;
            }
            found => return Err(FilterError::UnexpectedChar { position, found }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Result<(usize, Token), FilterError> {
        let token = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(FilterError::UnexpectedEnd)?;
        self.cursor += 1;
        Ok(token)
    }

    fn or(&mut self) -> Result<Filter, FilterError> {
        let mut filter = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            filter = Filter::Or(Box::new(filter), Box::new(self.and()?));
        }
        Ok(filter)
    }

    fn and(&mut self) -> Result<Filter, FilterError> {
        let mut filter = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            filter = Filter::And(Box::new(filter), Box::new(self.comparison()?));
        }
        Ok(filter)
    }

    fn comparison(&mut self) -> Result<Filter, FilterError> {
        if let Some((position, Token::LParen)) = self.tokens.get(self.cursor) {
            if self.depth == MAX_NESTING {
                return Err(FilterError::TooDeep { position: *position });
            }
            self.cursor += 1;
            self.depth += 1;
            let inner = self.or()?;
            self.depth -= 1;
            return match self.advance()? {
                (_, Token::RParen) => Ok(inner),
                (position, token) => Err(FilterError::UnexpectedToken {
                    position,
                    found: token.to_string(),
                }),
            };
        }

        let left = self.operand()?;
        let op = match self.advance()? {
            (_, Token::Op(op)) => op,
            (position, token) => {
                return Err(FilterError::UnexpectedToken {
                    position,
                    found: token.to_string(),
                });
            }
        };
        let right = self.operand()?;
        Ok(Filter::Compare(left, op, right))
    }

    fn operand(&mut self) -> Result<Operand, FilterError> {
        match self.advance()? {
            (_, Token::Str(text)) => Ok(Operand::Literal(Value::String(text))),
            (_, Token::Num(number)) => Ok(Operand::Literal(
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            (_, Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "null" => Operand::Literal(Value::Null),
                _ => Operand::Field(name.split('.').map(str::to_string).collect()),
            }),
            (position, token) => Err(FilterError::UnexpectedToken {
                position,
                found: token.to_string(),
            }),
        }
    }
}
