//! Query string parsing.
//!
//! Query strings are handed to a [`QueryParser`] before they reach a backend, so the
//! dialect is pluggable. [`LuceneQueryParser`] implements the boolean subset used by
//! the triage services:
//!
//! | syntax | meaning |
//! |--------|---------|
//! | `field:value`, `field:"a phrase"` | equality |
//! | `field:val*`, `field:v?l` | wildcard |
//! | `field:*`, `_exists_:field` | existence |
//! | `field:[a TO b]`, `field:{a TO b}`, `field:[a TO *]` | inclusive / exclusive / open ranges |
//! | `field:(a OR b)` | grouped values on one field |
//! | `*:*` | everything |
//! | `AND` `&&`, `OR` `||`, `NOT` `!` `-` | boolean operators |
//!
//! Precedence is `NOT` over `AND` over `OR`; adjacent clauses are ANDed. Values are
//! kept as strings; typing happens where the query is evaluated. Groups and negations
//! nest at most [`MAX_QUERY_DEPTH`] levels deep.

use std::fmt::Debug;

use serde_json::Value;

use crate::{
    error::{DatastoreError, DatastoreResult},
    query::{Expr, FieldOp},
};

/// Deepest nesting of groups and negations a query string may use.
pub const MAX_QUERY_DEPTH: usize = 128;

/// Translates a query string into a filter expression.
pub trait QueryParser: Send + Sync + Debug {
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidQuery`] when the string cannot be parsed.
    fn parse(&self, query: &str) -> DatastoreResult<Expr>;
}

/// Lucene-like boolean query parser.
#[derive(Debug, Clone, Default)]
pub struct LuceneQueryParser {
    default_field: Option<String>,
}

impl LuceneQueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field that bare terms (no `field:` prefix) are matched against.
    pub fn with_default_field(mut self, field: impl Into<String>) -> Self {
        self.default_field = Some(field.into());
        self
    }
}

impl QueryParser for LuceneQueryParser {
    fn parse(&self, query: &str) -> DatastoreResult<Expr> {
        if query.trim().is_empty() {
            return Ok(Expr::MatchAll);
        }

        let tokens = tokenize(query)?;
        let mut parser = Parser { tokens, position: 0, depth: 0, default_field: self.default_field.as_deref() };
        let expr = parser.parse_or(None)?;

        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(invalid(format!("unexpected {token:?} in '{query}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    And,
    Or,
    Not,
    Plus,
    RangeStart(bool),
    RangeEnd(bool),
    To,
    Term(Term),
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    /// Unescaped text.
    text: String,
    /// Text with its escapes kept, for wildcard matching.
    pattern: String,
    wildcard: bool,
    quoted: bool,
}

fn invalid(message: impl Into<String>) -> DatastoreError {
    DatastoreError::InvalidQuery(message.into())
}

fn is_boundary(c: char, in_range: bool) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | '[' | ']' | '{' | '}') || (c == ':' && !in_range)
}

fn tokenize(input: &str) -> DatastoreResult<Vec<Token>> {
    let chars = input.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut in_range = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let after_colon = matches!(tokens.last(), Some(Token::Colon));
        let next_is_word = chars.get(i + 1).is_some_and(|n| !n.is_whitespace());

        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ':' => tokens.push(Token::Colon),
            '[' | '{' => {
                in_range = true;
                tokens.push(Token::RangeStart(c == '['));
            }
            ']' | '}' => {
                in_range = false;
                tokens.push(Token::RangeEnd(c == ']'));
            }
            '"' => {
                let (term, next) = lex_quoted(&chars, i + 1)?;
                tokens.push(Token::Term(term));
                i = next;
                continue;
            }
            '-' | '!' if !after_colon && !in_range && next_is_word => tokens.push(Token::Not),
            '+' if !after_colon && !in_range && next_is_word => tokens.push(Token::Plus),
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
                continue;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
                continue;
            }
            _ => {
                let (term, next) = lex_word(&chars, i, in_range);
                // escaped spellings such as \AND stay terms
                let keyword = if term.pattern != term.text {
                    None
                } else {
                    match term.text.as_str() {
                        "AND" => Some(Token::And),
                        "OR" => Some(Token::Or),
                        "NOT" => Some(Token::Not),
                        "TO" if in_range => Some(Token::To),
                        _ => None,
                    }
                };

                tokens.push(keyword.unwrap_or(Token::Term(term)));
                i = next;
                continue;
            }
        }

        i += 1;
    }

    Ok(tokens)
}

fn lex_word(chars: &[char], start: usize, in_range: bool) -> (Term, usize) {
    let mut text = String::new();
    let mut pattern = String::new();
    let mut wildcard = false;
    let mut i = start;

    while i < chars.len() && !is_boundary(chars[i], in_range) {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let escaped = chars[i + 1];
                text.push(escaped);
                pattern.push('\\');
                pattern.push(escaped);
                i += 2;
            }
            c => {
                wildcard |= matches!(c, '*' | '?');
                text.push(c);
                pattern.push(c);
                i += 1;
            }
        }
    }

    (Term { text, pattern, wildcard, quoted: false }, i)
}

fn lex_quoted(chars: &[char], start: usize) -> DatastoreResult<(Term, usize)> {
    let mut text = String::new();
    let mut i = start;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(chars[i + 1]);
                i += 2;
            }
            '"' => {
                let pattern = text.replace('\\', "\\\\").replace('*', "\\*").replace('?', "\\?");
                return Ok((Term { text, pattern, wildcard: false, quoted: true }, i + 1));
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(invalid("unterminated quoted phrase"))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
    default_field: Option<&'a str>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> DatastoreResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(invalid(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> DatastoreResult<T>) -> DatastoreResult<T> {
        if self.depth >= MAX_QUERY_DEPTH {
            return Err(invalid(format!("query nests deeper than {MAX_QUERY_DEPTH} levels")));
        }

        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self, field: Option<&str>) -> DatastoreResult<Expr> {
        let mut clauses = vec![self.parse_and(field)?];

        while self.peek() == Some(&Token::Or) {
            self.next();
            clauses.push(self.parse_and(field)?);
        }

        Ok(if clauses.len() == 1 { clauses.remove(0) } else { Expr::Or(clauses) })
    }

    fn parse_and(&mut self, field: Option<&str>) -> DatastoreResult<Expr> {
        let mut clauses = vec![self.parse_unary(field)?];

        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                }
                Some(Token::Not | Token::Plus | Token::LParen | Token::RangeStart(_) | Token::Term(_)) => {}
                _ => break,
            }

            clauses.push(self.parse_unary(field)?);
        }

        Ok(if clauses.len() == 1 { clauses.remove(0) } else { Expr::And(clauses) })
    }

    fn parse_unary(&mut self, field: Option<&str>) -> DatastoreResult<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                Ok(self.nested(|parser| parser.parse_unary(field))?.not())
            }
            Some(Token::Plus) => {
                self.next();
                self.nested(|parser| parser.parse_unary(field))
            }
            _ => self.parse_primary(field),
        }
    }

    fn parse_primary(&mut self, field: Option<&str>) -> DatastoreResult<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.nested(|parser| parser.parse_or(field))?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::RangeStart(inclusive)) => {
                let field = self.scoped_field(field)?;
                self.parse_range(&field, inclusive)
            }
            Some(Token::Term(term)) if self.peek() == Some(&Token::Colon) && !term.quoted => {
                self.next();
                self.parse_field_value(&term.text)
            }
            Some(Token::Term(term)) => {
                let field = self.scoped_field(field)?;
                Ok(term_expr(&field, term))
            }
            other => Err(invalid(format!("unexpected {other:?}"))),
        }
    }

    fn parse_field_value(&mut self, field: &str) -> DatastoreResult<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.nested(|parser| parser.parse_or(Some(field)))?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::RangeStart(inclusive)) => self.parse_range(field, inclusive),
            Some(Token::Term(term)) if field == "*" && term.text == "*" => Ok(Expr::MatchAll),
            Some(Token::Term(term)) if field == "_exists_" => Ok(Expr::Exists(term.text, true)),
            Some(Token::Term(term)) => Ok(term_expr(field, term)),
            other => Err(invalid(format!("expected a value for '{field}', found {other:?}"))),
        }
    }

    fn parse_range(&mut self, field: &str, lower_inclusive: bool) -> DatastoreResult<Expr> {
        let lower = self.range_bound()?;
        self.expect(Token::To)?;
        let upper = self.range_bound()?;

        let upper_inclusive = match self.next() {
            Some(Token::RangeEnd(inclusive)) => inclusive,
            other => return Err(invalid(format!("unterminated range on '{field}', found {other:?}"))),
        };

        let mut bounds = Vec::new();

        if let Some(lower) = lower {
            let op = if lower_inclusive { FieldOp::Gte } else { FieldOp::Gt };
            bounds.push(Expr::field(field.to_string(), op, Value::String(lower)));
        }

        if let Some(upper) = upper {
            let op = if upper_inclusive { FieldOp::Lte } else { FieldOp::Lt };
            bounds.push(Expr::field(field.to_string(), op, Value::String(upper)));
        }

        Ok(match bounds.len() {
            0 => Expr::Exists(field.to_string(), true),
            1 => bounds.remove(0),
            _ => Expr::And(bounds),
        })
    }

    fn range_bound(&mut self) -> DatastoreResult<Option<String>> {
        match self.next() {
            Some(Token::Term(term)) if term.text == "*" && !term.quoted => Ok(None),
            Some(Token::Term(term)) => Ok(Some(term.text)),
            other => Err(invalid(format!("expected a range bound, found {other:?}"))),
        }
    }

    fn scoped_field(&self, field: Option<&str>) -> DatastoreResult<String> {
        field
            .or(self.default_field)
            .map(str::to_string)
            .ok_or_else(|| invalid("term without a field and no default field configured"))
    }
}

fn term_expr(field: &str, term: Term) -> Expr {
    if !term.quoted && term.text == "*" {
        return Expr::Exists(field.to_string(), true);
    }

    if !term.quoted && term.wildcard {
        return Expr::field(field.to_string(), FieldOp::Wildcard, Value::String(term.pattern));
    }

    Expr::field(field.to_string(), FieldOp::Eq, Value::String(term.text))
}
