//! Parsing and evaluation of DynamoDB filter expressions, for stores that apply filters
//! themselves.
//!
//! The supported grammar covers comparisons, `BETWEEN`, `IN`, `AND`/`OR`/`NOT`, parentheses,
//! `size()`, nested paths and the `attribute_exists`, `attribute_not_exists`, `attribute_type`,
//! `begins_with` and `contains` functions. `#name` and `:value` placeholders are substituted when
//! the expression is parsed.

use super::{
    value::{Item, Value},
    Error, Result,
};
use std::{borrow::Cow, cmp::Ordering, collections::HashMap};

type ParseResult<T> = std::result::Result<T, String>;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Name(String),
    Placeholder(String),
    Ident(String),
    Index(usize),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
}

#[derive(Clone, Debug, PartialEq)]
enum PathElement {
    Attribute(String),
    Index(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Path(Vec<PathElement>),
    Value(Value),
    Size(Vec<PathElement>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Compare(Operand, CompareOp, Operand),
    Between(Operand, Operand, Operand),
    In(Operand, Vec<Operand>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    AttributeExists(Vec<PathElement>),
    AttributeNotExists(Vec<PathElement>),
    AttributeType(Vec<PathElement>, Operand),
    BeginsWith(Operand, Operand),
    Contains(Operand, Operand),
}

/// A parsed filter expression with its placeholders substituted.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    /// Parses `expression`. Values must already be in their stored form. Undefined placeholders
    /// and syntax errors are `Error::InvalidQuery`.
    pub fn parse(expression: &str, names: &HashMap<String, String>, values: &HashMap<String, Value>) -> Result<Self> {
        let invalid = |msg: String| Error::InvalidQuery(format!("filter expression {:?}: {}", expression, msg));
        let mut parser = Parser {
            tokens: tokenize(expression).map_err(invalid)?,
            pos: 0,
            names,
            values,
        };
        let expr = parser.or_expr().map_err(invalid)?;
        if let Some(token) = parser.peek(0) {
            return Err(invalid(format!("unexpected {:?}", token)));
        }
        Ok(Self { expr })
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.expr.eval(item)
    }
}

fn take_word(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if !(c.is_alphanumeric() || c == '_') {
            break;
        }
        word.push(c);
        chars.next();
    }
    word
}

fn tokenize(expression: &str) -> ParseResult<Vec<Token>> {
    let mut chars = expression.chars().peekable();
    let mut tokens = vec![];
    while let Some(&c) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '#' | ':' => {
                chars.next();
                let word = take_word(&mut chars);
                if word.is_empty() {
                    return Err(format!("expected a placeholder name after {}", c));
                }
                match c {
                    '#' => Token::Name(format!("#{}", word)),
                    _ => Token::Placeholder(format!(":{}", word)),
                }
            }
            '[' => {
                chars.next();
                let digits = take_word(&mut chars);
                if chars.next() != Some(']') {
                    return Err("unterminated list index".to_string());
                }
                Token::Index(digits.parse().map_err(|_| format!("invalid list index {:?}", digits))?)
            }
            c if c.is_alphanumeric() || c == '_' => Token::Ident(take_word(&mut chars)),
            _ => {
                chars.next();
                match c {
                    '=' => Token::Eq,
                    '<' => match chars.peek() {
                        Some('=') => {
                            chars.next();
                            Token::Le
                        }
                        Some('>') => {
                            chars.next();
                            Token::Ne
                        }
                        _ => Token::Lt,
                    },
                    '>' => match chars.peek() {
                        Some('=') => {
                            chars.next();
                            Token::Ge
                        }
                        _ => Token::Gt,
                    },
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    c => return Err(format!("unexpected character {:?}", c)),
                }
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Recursive descent in precedence order: `OR`, then `AND`, then `NOT`, then primaries.
struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, Value>,
}

impl Parser<'_> {
    fn peek(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        match self.peek(0) {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?} at the end", expected)),
        }
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.keyword("OR") {
            left = Expr::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.not_expr()?;
        while self.keyword("AND") {
            left = Expr::And(Box::new(left), Box::new(self.not_expr()?));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ParseResult<Expr> {
        if self.keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        if self.peek(0) == Some(&Token::LParen) {
            self.pos += 1;
            let expr = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(expr);
        }
        if let (Some(Token::Ident(name)), Some(Token::LParen)) = (self.peek(0), self.peek(1)) {
            if name != "size" {
                let name = name.clone();
                self.pos += 2;
                let expr = self.function(&name)?;
                self.expect(Token::RParen)?;
                return Ok(expr);
            }
        }

        let left = self.operand()?;
        if self.keyword("BETWEEN") {
            let low = self.operand()?;
            if !self.keyword("AND") {
                return Err("expected AND in BETWEEN".to_string());
            }
            return Ok(Expr::Between(left, low, self.operand()?));
        }
        if self.keyword("IN") {
            self.expect(Token::LParen)?;
            let mut list = vec![self.operand()?];
            while self.peek(0) == Some(&Token::Comma) {
                self.pos += 1;
                list.push(self.operand()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In(left, list));
        }
        let op = match self.next() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            other => return Err(format!("expected a comparison, found {:?}", other)),
        };
        Ok(Expr::Compare(left, op, self.operand()?))
    }

    fn function(&mut self, name: &str) -> ParseResult<Expr> {
        Ok(match name {
            "attribute_exists" => Expr::AttributeExists(self.path()?),
            "attribute_not_exists" => Expr::AttributeNotExists(self.path()?),
            "attribute_type" => {
                let path = self.path()?;
                self.expect(Token::Comma)?;
                Expr::AttributeType(path, self.operand()?)
            }
            "begins_with" => {
                let operand = self.operand()?;
                self.expect(Token::Comma)?;
                Expr::BeginsWith(operand, self.operand()?)
            }
            "contains" => {
                let operand = self.operand()?;
                self.expect(Token::Comma)?;
                Expr::Contains(operand, self.operand()?)
            }
            _ => return Err(format!("unknown function {}", name)),
        })
    }

    fn operand(&mut self) -> ParseResult<Operand> {
        match self.peek(0) {
            Some(Token::Placeholder(placeholder)) => {
                let value = self.values.get(placeholder).cloned();
                let value = value.ok_or_else(|| format!("undefined value {}", placeholder))?;
                self.pos += 1;
                Ok(Operand::Value(value))
            }
            Some(Token::Ident(word)) if word == "size" && self.peek(1) == Some(&Token::LParen) => {
                self.pos += 2;
                let path = self.path()?;
                self.expect(Token::RParen)?;
                Ok(Operand::Size(path))
            }
            _ => self.path().map(Operand::Path),
        }
    }

    fn path(&mut self) -> ParseResult<Vec<PathElement>> {
        let mut path = vec![PathElement::Attribute(self.attribute_name()?)];
        loop {
            match self.peek(0) {
                Some(Token::Dot) => {
                    self.pos += 1;
                    path.push(PathElement::Attribute(self.attribute_name()?));
                }
                Some(&Token::Index(i)) => {
                    self.pos += 1;
                    path.push(PathElement::Index(i));
                }
                _ => return Ok(path),
            }
        }
    }

    fn attribute_name(&mut self) -> ParseResult<String> {
        match self.next() {
            Some(Token::Name(name)) => self.names.get(&name).cloned().ok_or_else(|| format!("undefined name {}", name)),
            Some(Token::Ident(word)) => Ok(word),
            other => Err(format!("expected an attribute, found {:?}", other)),
        }
    }
}

fn resolve<'a>(item: &'a Item, path: &[PathElement]) -> Option<&'a Value> {
    let mut elements = path.iter();
    let mut current = match elements.next()? {
        PathElement::Attribute(name) => item.get(name)?,
        PathElement::Index(_) => return None,
    };
    for element in elements {
        current = match (element, current) {
            (PathElement::Attribute(name), Value::M(m)) => m.get(name)?,
            (PathElement::Index(i), Value::L(l)) => l.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn size(v: &Value) -> Option<usize> {
    match v {
        Value::S(s) => Some(s.len()),
        Value::B(b) => Some(b.len()),
        Value::L(l) => Some(l.len()),
        Value::M(m) => Some(m.len()),
        _ => None,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOL",
        Value::N(_) | Value::Timestamp(_) => "N",
        Value::S(_) => "S",
        Value::B(_) => "B",
        Value::L(_) => "L",
        Value::M(_) => "M",
    }
}

pub(crate) fn contains(actual: &Value, v: &Value) -> bool {
    match (actual, v) {
        (Value::S(a), Value::S(b)) => a.contains(b.as_str()),
        (Value::B(a), Value::B(b)) => b.is_empty() || a.windows(b.len()).any(|w| w == b.as_slice()),
        (Value::L(a), v) => a.iter().any(|e| e.matches(v)),
        _ => false,
    }
}

pub(crate) fn begins_with(actual: &Value, v: &Value) -> bool {
    match (actual, v) {
        (Value::S(a), Value::S(b)) => a.starts_with(b.as_str()),
        (Value::B(a), Value::B(b)) => a.starts_with(b),
        _ => false,
    }
}

impl Operand {
    fn resolve<'a>(&'a self, item: &'a Item) -> Option<Cow<'a, Value>> {
        match self {
            Self::Value(v) => Some(Cow::Borrowed(v)),
            Self::Path(path) => resolve(item, path).map(Cow::Borrowed),
            Self::Size(path) => size(resolve(item, path)?).map(|n| Cow::Owned(Value::N(n.to_string()))),
        }
    }
}

impl CompareOp {
    fn test(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left.matches(right),
            Self::Ne => !left.matches(right),
            Self::Lt => left.compare(right) == Some(Ordering::Less),
            Self::Le => matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => left.compare(right) == Some(Ordering::Greater),
            Self::Ge => matches!(left.compare(right), Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

impl Expr {
    fn eval(&self, item: &Item) -> bool {
        match self {
            // a missing attribute is never equal to anything
            Self::Compare(left, op, right) => match (left.resolve(item), right.resolve(item)) {
                (Some(left), Some(right)) => op.test(&left, &right),
                _ => *op == CompareOp::Ne,
            },
            Self::Between(v, low, high) => match (v.resolve(item), low.resolve(item), high.resolve(item)) {
                (Some(v), Some(low), Some(high)) => CompareOp::Ge.test(&v, &low) && CompareOp::Le.test(&v, &high),
                _ => false,
            },
            Self::In(v, list) => v
                .resolve(item)
                .map_or(false, |v| list.iter().filter_map(|o| o.resolve(item)).any(|o| v.matches(&o))),
            Self::And(a, b) => a.eval(item) && b.eval(item),
            Self::Or(a, b) => a.eval(item) || b.eval(item),
            Self::Not(e) => !e.eval(item),
            Self::AttributeExists(path) => resolve(item, path).is_some(),
            Self::AttributeNotExists(path) => resolve(item, path).is_none(),
            Self::AttributeType(path, t) => match (resolve(item, path), t.resolve(item)) {
                (Some(v), Some(t)) => t.as_str() == Some(type_name(v)),
                _ => false,
            },
            Self::BeginsWith(a, b) => match (a.resolve(item), b.resolve(item)) {
                (Some(a), Some(b)) => begins_with(&a, &b),
                _ => false,
            },
            Self::Contains(a, b) => match (a.resolve(item), b.resolve(item)) {
                (Some(a), Some(b)) => contains(&a, &b),
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn item() -> Item {
        let mut item = Item::new();
        item.insert("status".into(), Value::S("open".into()));
        item.insert("total".into(), Value::N("150".into()));
        item.insert("note".into(), Value::S("gift wrap".into()));
        item.insert("tags".into(), Value::L(vec![Value::S("red".into()), Value::S("blue".into())]));
        item.insert(
            "address".into(),
            Value::M(BTreeMap::from([("city".to_string(), Value::S("Oslo".into()))])),
        );
        item
    }

    fn eval(expression: &str) -> bool {
        let names = HashMap::from([("#s".to_string(), "status".to_string()), ("#t".to_string(), "total".to_string())]);
        let values = HashMap::from([
            (":open".to_string(), Value::S("open".into())),
            (":low".to_string(), Value::N("100".into())),
            (":high".to_string(), Value::N("200".into())),
            (":gift".to_string(), Value::S("gift".into())),
            (":red".to_string(), Value::S("red".into())),
            (":oslo".to_string(), Value::S("Oslo".into())),
            (":two".to_string(), Value::N("2".into())),
            (":type".to_string(), Value::S("N".into())),
        ]);
        Filter::parse(expression, &names, &values).unwrap().matches(&item())
    }

    #[test]
    fn test_comparisons() {
        assert!(eval("#s = :open"));
        assert!(!eval("#s <> :open"));
        assert!(eval("#t > :low"));
        assert!(eval("#t >= :low AND #t <= :high"));
        assert!(!eval("#t < :low"));
        assert!(eval("missing <> :open"));
        assert!(!eval("missing = :open"));
        assert!(!eval("#s > :low"));
    }

    #[test]
    fn test_between_and_in() {
        assert!(eval("#t BETWEEN :low AND :high"));
        assert!(!eval("#t between :high and :high"));
        assert!(eval("#s IN (:gift, :open)"));
        assert!(!eval("#s IN (:gift)"));
    }

    #[test]
    fn test_logical_precedence() {
        assert!(eval("#s = :gift OR #t > :low AND #t < :high"));
        assert!(!eval("(#s = :gift OR #t > :low) AND #t > :high"));
        assert!(eval("NOT #s = :gift"));
        assert!(!eval("NOT (#s = :open)"));
    }

    #[test]
    fn test_functions() {
        assert!(eval("attribute_exists(note)"));
        assert!(eval("attribute_not_exists(missing)"));
        assert!(eval("begins_with(note, :gift)"));
        assert!(eval("contains(note, :gift)"));
        assert!(eval("contains(tags, :red)"));
        assert!(eval("size(tags) = :two"));
        assert!(eval("attribute_type(#t, :type)"));
        assert!(eval("address.city = :oslo"));
        assert!(eval("tags[0] = :red"));
        assert!(!eval("tags[5] = :red"));
    }

    #[test]
    fn test_rejections() {
        let none = HashMap::new();
        let parse = |e: &str| Filter::parse(e, &none, &HashMap::new());
        assert!(matches!(parse("#missing = status"), Err(Error::InvalidQuery(_))));
        assert!(matches!(parse("status = :missing"), Err(Error::InvalidQuery(_))));
        assert!(matches!(parse("status ="), Err(Error::InvalidQuery(_))));
        assert!(matches!(parse("status = status)"), Err(Error::InvalidQuery(_))));
        assert!(matches!(parse("unknown_fn(status)"), Err(Error::InvalidQuery(_))));
        assert!(matches!(parse("status ! other"), Err(Error::InvalidQuery(_))));
    }
}
