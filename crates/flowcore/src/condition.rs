//! Edge conditions.
//!
//! Conditions are a small expression language evaluated against the output of
//! the edge's source node. Nothing is ever compiled to code; the grammar only
//! knows field lookups, literals, comparisons and boolean combinators:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := operand ( ( "==" | "!=" | ">" | ">=" | "<" | "<=" | "contains" ) operand )?
//! operand    := number | string | true | false | null | path | "(" expr ")"
//! path       := ident ( "." ( ident | digits ) )*
//! ```
//!
//! A path starting with `output` is rooted at the source node's output; any
//! other path is looked up inside it, so `status == "ok"` and
//! `output.status == "ok"` are equivalent.

use crate::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("empty expression")]
    Empty,

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Maximum nesting of `!` and parentheses in one expression
pub const MAX_CONDITION_DEPTH: usize = 64;

/// A condition attached to a workflow edge, stored in its source form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeCondition(String);

impl EdgeCondition {
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the expression without evaluating it
    pub fn parse(&self) -> Result<Expr, ConditionError> {
        let tokens = tokenize(&self.0)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(ConditionError::UnexpectedToken(token.to_string())),
        }
    }

    /// Evaluate against the source node's output
    pub fn evaluate(&self, output: &Value) -> Result<bool, ConditionError> {
        Ok(self.parse()?.evaluate(output).is_truthy())
    }
}

impl fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeCondition {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
}

impl Expr {
    pub fn evaluate(&self, output: &Value) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(segments) => resolve(output, segments),
            Expr::Not(inner) => Value::Bool(!inner.evaluate(output).is_truthy()),
            Expr::And(lhs, rhs) => {
                Value::Bool(lhs.evaluate(output).is_truthy() && rhs.evaluate(output).is_truthy())
            }
            Expr::Or(lhs, rhs) => {
                Value::Bool(lhs.evaluate(output).is_truthy() || rhs.evaluate(output).is_truthy())
            }
            Expr::Compare(lhs, op, rhs) => {
                Value::Bool(compare(&lhs.evaluate(output), *op, &rhs.evaluate(output)))
            }
        }
    }
}

fn resolve(output: &Value, segments: &[String]) -> Value {
    let segments = match segments.first().map(String::as_str) {
        Some("output") => &segments[1..],
        _ => segments,
    };
    segments
        .iter()
        .try_fold(output, |current, segment| current.get(segment))
        .cloned()
        .unwrap_or(Value::Null)
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Contains => match (lhs, rhs) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ordering) => match op {
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                    CompareOp::Lt => ordering.is_lt(),
                    _ => ordering.is_le(),
                },
                None => false,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(CompareOp),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Ident(s) => f.write_str(s),
            Token::Dot => f.write_str("."),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Not => f.write_str("!"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Op(op) => write!(f, "{op:?}"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
                i += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or(ConditionError::UnterminatedString)?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // a dot followed by a non-digit ends the number (path segment)
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Op(CompareOp::Contains),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => return Err(ConditionError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_CONDITION_DEPTH {
            return Err(ConditionError::TooDeep(MAX_CONDITION_DEPTH));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.parse_operand()?;
            return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        match self.advance().ok_or(ConditionError::UnexpectedEnd)? {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ConditionError::UnexpectedToken(other.to_string())),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => self.parse_path(word),
            },
            other => Err(ConditionError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_path(&mut self, head: String) -> Result<Expr, ConditionError> {
        let mut segments = vec![head];
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance().ok_or(ConditionError::UnexpectedEnd)? {
                Token::Ident(segment) => segments.push(segment),
                Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                    segments.push((n as u64).to_string())
                }
                other => return Err(ConditionError::UnexpectedToken(other.to_string())),
            }
        }
        Ok(Expr::Path(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, output: serde_json::Value) -> bool {
        EdgeCondition::new(expr).evaluate(&Value::from(output)).unwrap()
    }

    #[test]
    fn comparisons_on_output_fields() {
        let out = json!({ "status": "ok", "count": 3, "tags": ["a", "b"] });
        assert!(eval("status == \"ok\"", out.clone()));
        assert!(eval("output.status != 'failed'", out.clone()));
        assert!(eval("count >= 3 && count < 10", out.clone()));
        assert!(!eval("count > 3", out.clone()));
        assert!(eval("tags contains \"b\"", out.clone()));
        assert!(eval("tags.0 == \"a\"", out));
    }

    #[test]
    fn boolean_combinators_and_truthiness() {
        let out = json!({ "approved": true, "risk": 0 });
        assert!(eval("approved", out.clone()));
        assert!(!eval("risk", out.clone()));
        assert!(eval("!risk || missing", out.clone()));
        assert!(eval("not (approved and risk)", out.clone()));
        assert!(!eval("missing.deeply.nested", out));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(EdgeCondition::new("").parse().is_err());
        assert!(EdgeCondition::new("status ==").parse().is_err());
        assert!(EdgeCondition::new("(a == 1").parse().is_err());
        assert!(EdgeCondition::new("'open").parse().is_err());
        assert!(EdgeCondition::new("a; drop()").parse().is_err());
        assert!(EdgeCondition::new("a b").parse().is_err());
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let bangs = format!("{}a", "!".repeat(200_000));
        assert_eq!(
            EdgeCondition::new(bangs).parse(),
            Err(ConditionError::TooDeep(MAX_CONDITION_DEPTH))
        );

        let parens = format!("{}a{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            EdgeCondition::new(parens).parse(),
            Err(ConditionError::TooDeep(_))
        ));

        // Moderate nesting still parses
        let shallow = format!("{}a == 1{}", "(".repeat(10), ")".repeat(10));
        assert!(EdgeCondition::new(format!("!!{shallow}")).parse().is_ok());
    }
}
