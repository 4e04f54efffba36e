//! Query expressions for device enumeration
//!
//! A small attribute-equality language over device properties and
//! capabilities, e.g.:
//!
//! ```text
//! capability.battery == true
//! IdType == "ext4" and capability.storage_access == true
//! Subsystem == "net" or Subsystem == "tty"
//! ```
//!
//! `and` binds tighter than `or`; parentheses group.

use std::collections::HashSet;

use hardware_types::{Capability, PropertyMap, PropertyValue};

use crate::error::HardwareError;

/// Everything a query is evaluated against for one device.
pub struct QueryContext<'a> {
    pub capabilities: &'a HashSet<Capability>,
    pub properties: &'a PropertyMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// `capability.<name> == <bool>`
    HasCapability(Capability, bool),
    /// `<key> == <literal>`
    PropertyEquals(String, Literal),
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Query {
    pub fn parse(input: &str) -> Result<Query, HardwareError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let query = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(HardwareError::Query(format!(
                "trailing input after expression: {input}"
            )));
        }
        Ok(query)
    }

    pub fn matches(&self, ctx: &QueryContext<'_>) -> bool {
        match self {
            Query::HasCapability(cap, expected) => ctx.capabilities.contains(cap) == *expected,
            Query::PropertyEquals(key, literal) => ctx
                .properties
                .get(key)
                .is_some_and(|value| literal.matches(value)),
            Query::And(a, b) => a.matches(ctx) && b.matches(ctx),
            Query::Or(a, b) => a.matches(ctx) || b.matches(ctx),
        }
    }
}

impl Literal {
    fn matches(&self, value: &PropertyValue) -> bool {
        match self {
            Literal::Bool(b) => value.as_bool() == Some(*b),
            Literal::Int(i) => value.as_i64() == Some(*i),
            Literal::Float(f) => value.as_f64() == Some(*f),
            Literal::Text(s) => match value {
                PropertyValue::Text(t) => t == s,
                PropertyValue::TextList(l) => l.iter().any(|t| t == s),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Eq,
    And,
    Or,
    Word(String),
    Quoted(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, HardwareError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(HardwareError::Query("expected '==' operator".into()));
                }
                tokens.push(Token::Eq);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(HardwareError::Query("unterminated string literal".into()));
                        }
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if is_word_char(c) {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    _ => tokens.push(Token::Word(word)),
                }
            }
            other => {
                return Err(HardwareError::Query(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '/' | ':' | '+')
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Query, HardwareError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.and_expr()?;
            left = Query::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Query, HardwareError> {
        let mut left = self.primary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.primary()?;
            left = Query::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Query, HardwareError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(HardwareError::Query("missing closing parenthesis".into())),
                }
            }
            Some(Token::Word(path)) => self.comparison(path),
            other => Err(HardwareError::Query(format!(
                "expected a comparison, found {other:?}"
            ))),
        }
    }

    fn comparison(&mut self, path: String) -> Result<Query, HardwareError> {
        if self.next() != Some(Token::Eq) {
            return Err(HardwareError::Query(format!("expected '==' after {path}")));
        }
        let literal = match self.next() {
            Some(Token::Quoted(s)) => Literal::Text(s),
            Some(Token::Word(w)) => parse_literal(&w),
            other => {
                return Err(HardwareError::Query(format!(
                    "expected a literal after '==', found {other:?}"
                )));
            }
        };

        if let Some(name) = path.strip_prefix("capability.") {
            let capability: Capability = name
                .parse()
                .map_err(|_| HardwareError::Query(format!("unknown capability: {name}")))?;
            let expected = match literal {
                Literal::Bool(b) => b,
                other => {
                    return Err(HardwareError::Query(format!(
                        "capability test needs a boolean, found {other:?}"
                    )));
                }
            };
            return Ok(Query::HasCapability(capability, expected));
        }

        Ok(Query::PropertyEquals(path, literal))
    }
}

fn parse_literal(word: &str) -> Literal {
    match word {
        "true" => return Literal::Bool(true),
        "false" => return Literal::Bool(false),
        _ => {}
    }
    if let Ok(i) = word.parse::<i64>() {
        return Literal::Int(i);
    }
    if let Ok(f) = word.parse::<f64>() {
        return Literal::Float(f);
    }
    Literal::Text(word.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(caps: &[Capability], props: &[(&str, PropertyValue)]) -> (HashSet<Capability>, PropertyMap) {
        let capabilities: HashSet<Capability> = caps.iter().copied().collect();
        let properties: PropertyMap = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        (capabilities, properties)
    }

    #[test]
    fn capability_test_parses_and_matches() {
        let query = Query::parse("capability.battery == true").unwrap();
        assert_eq!(query, Query::HasCapability(Capability::Battery, true));

        let (caps, props) = ctx_with(&[Capability::Battery, Capability::Generic], &[]);
        assert!(query.matches(&QueryContext {
            capabilities: &caps,
            properties: &props
        }));

        let (caps, props) = ctx_with(&[Capability::Generic], &[]);
        assert!(!query.matches(&QueryContext {
            capabilities: &caps,
            properties: &props
        }));
    }

    #[test]
    fn property_equality_over_strings_and_numbers() {
        let query = Query::parse("IdType == 'ext4' and Size == 512").unwrap();
        let (caps, props) = ctx_with(
            &[],
            &[
                ("IdType", PropertyValue::from("ext4")),
                ("Size", PropertyValue::from(512u64)),
            ],
        );
        assert!(query.matches(&QueryContext {
            capabilities: &caps,
            properties: &props
        }));
    }

    #[test]
    fn or_binds_looser_than_and() {
        // a and b or c parses as (a and b) or c
        let query =
            Query::parse("X == 1 and Y == 2 or Z == 3").unwrap();
        let (caps, props) = ctx_with(&[], &[("Z", PropertyValue::Int(3))]);
        assert!(query.matches(&QueryContext {
            capabilities: &caps,
            properties: &props
        }));
    }

    #[test]
    fn missing_property_never_matches() {
        let query = Query::parse("Vendor == 'ACME'").unwrap();
        let (caps, props) = ctx_with(&[], &[]);
        assert!(!query.matches(&QueryContext {
            capabilities: &caps,
            properties: &props
        }));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(Query::parse("capability.battery =").is_err());
        assert!(Query::parse("capability.warp_drive == true").is_err());
        assert!(Query::parse("(A == 1").is_err());
        assert!(Query::parse("A == 1 garbage").is_err());
        assert!(Query::parse("capability.battery == 'yes'").is_err());
    }
}
