//! `$filter` compiler: OData comparison/logical grammar into a store-agnostic `Predicate`.
//!
//! Precedence, tightest first: `not`, comparison, `and`, `or`. `not` applies to the
//! next comparison or parenthesized group. Parse failures reject the whole filter.

use crate::error::FilterSyntaxError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt;

/// Dotted path to a (possibly nested) document field. Segments are `[A-Za-z0-9_]+`,
/// which keeps paths safe to embed in generated SQL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse `a.b.c` (OData `a/b/c` is accepted too). Returns None for anything else.
    pub fn parse(s: &str) -> Option<FieldPath> {
        let segments: Vec<String> = s.split(['.', '/']).map(str::to_string).collect();
        let valid = segments
            .iter()
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        if valid && !s.is_empty() {
            Some(FieldPath(segments))
        } else {
            None
        }
    }

    pub fn id() -> FieldPath {
        FieldPath(vec!["_id".to_string()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn root(&self) -> &str {
        &self.0[0]
    }

    pub fn is_id(&self) -> bool {
        self.0.len() == 1 && self.0[0] == "_id"
    }

    /// Value at this path; missing fields are None.
    pub fn lookup<'a>(&self, doc: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut cur = doc.get(first)?;
        for seg in rest {
            cur = match cur {
                Value::Object(m) => m.get(seg)?,
                Value::Array(a) => a.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn from_keyword(s: &str) -> Option<CmpOp> {
        Some(match s {
            "eq" => CmpOp::Eq,
            "ne" => CmpOp::Ne,
            "gt" => CmpOp::Gt,
            "ge" => CmpOp::Ge,
            "lt" => CmpOp::Lt,
            "le" => CmpOp::Le,
            _ => return None,
        })
    }

    /// The operator with its operands swapped (`2000 lt year` is `year gt 2000`).
    fn flipped(self) -> CmpOp {
        match self {
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFn {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextFn {
    fn from_name(s: &str) -> Option<TextFn> {
        Some(match s {
            "contains" | "substringof" => TextFn::Contains,
            "startswith" => TextFn::StartsWith,
            "endswith" => TextFn::EndsWith,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TextFn::Contains => "contains",
            TextFn::StartsWith => "startswith",
            TextFn::EndsWith => "endswith",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare { field: FieldPath, op: CmpOp, value: Value },
    Text { func: TextFn, field: FieldPath, value: String },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: FieldPath, value: Value) -> Predicate {
        Predicate::Compare { field, op: CmpOp::Eq, value }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Every field path the predicate references.
    pub fn fields(&self) -> Vec<&FieldPath> {
        match self {
            Predicate::Compare { field, .. } | Predicate::Text { field, .. } => vec![field],
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                let mut out = l.fields();
                out.extend(r.fields());
                out
            }
            Predicate::Not(p) => p.fields(),
        }
    }

    /// Evaluate against a plain document. Missing fields read as null.
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                let lhs = field.lookup(doc).unwrap_or(&Value::Null);
                match op {
                    CmpOp::Eq => json_eq(lhs, value),
                    CmpOp::Ne => !json_eq(lhs, value),
                    _ if type_rank(lhs) != type_rank(value) => false,
                    CmpOp::Gt => compare_json(lhs, value) == Ordering::Greater,
                    CmpOp::Ge => compare_json(lhs, value) != Ordering::Less,
                    CmpOp::Lt => compare_json(lhs, value) == Ordering::Less,
                    CmpOp::Le => compare_json(lhs, value) != Ordering::Greater,
                }
            }
            Predicate::Text { func, field, value } => match field.lookup(doc) {
                Some(Value::String(s)) => match func {
                    TextFn::Contains => s.contains(value.as_str()),
                    TextFn::StartsWith => s.starts_with(value.as_str()),
                    TextFn::EndsWith => s.ends_with(value.as_str()),
                },
                _ => false,
            },
            Predicate::And(l, r) => l.matches(doc) && r.matches(doc),
            Predicate::Or(l, r) => l.matches(doc) || r.matches(doc),
            Predicate::Not(p) => !p.matches(doc),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { field, op, value } => write!(f, "{} {} {}", field, op.symbol(), value),
            Predicate::Text { func, field, value } => write!(f, "{}({}, {:?})", func.name(), field, value),
            Predicate::And(l, r) => write!(f, "({}) AND ({})", l, r),
            Predicate::Or(l, r) => write!(f, "({}) OR ({})", l, r),
            Predicate::Not(p) => write!(f, "NOT ({})", p),
        }
    }
}

/// Rank of a JSON type in the store ordering: null < string < number < bool < array < object.
pub fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values, grouping by type first.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let o = compare_json(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    LParen,
    RParen,
    Comma,
    Word(String),
    Str(String),
    Num(Number),
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterSyntaxError> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    let err = |start: usize, message: &str| FilterSyntaxError {
        clause: input[start..].trim().to_string(),
        position: start,
        message: message.to_string(),
    };
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'(' | b')' | b',' => {
                i += 1;
                let tok = match c {
                    b'(' => Tok::LParen,
                    b')' => Tok::RParen,
                    _ => Tok::Comma,
                };
                out.push(Token { tok, start, end: i });
            }
            b'\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match input[i..].find('\'') {
                        None => return Err(err(start, "unterminated string literal")),
                        Some(off) => {
                            s.push_str(&input[i..i + off]);
                            i += off + 1;
                            // '' is an escaped quote
                            if bytes.get(i) == Some(&b'\'') {
                                s.push('\'');
                                i += 1;
                            } else {
                                break;
                            }
                        }
                    }
                }
                out.push(Token { tok: Tok::Str(s), start, end: i });
            }
            b'0'..=b'9' | b'-' => {
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || matches!(bytes[i], b'.' | b'e' | b'E' | b'+')) {
                    // a sign is only part of the number right after an exponent marker
                    if bytes[i] == b'+' && !matches!(bytes[i - 1], b'e' | b'E') {
                        break;
                    }
                    i += 1;
                }
                let text = &input[start..i];
                let num = if let Ok(n) = text.parse::<i64>() {
                    Number::from(n)
                } else {
                    text.parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .ok_or_else(|| err(start, "invalid number literal"))?
                };
                out.push(Token { tok: Tok::Num(num), start, end: i });
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.' | b'/')) {
                    i += 1;
                }
                out.push(Token { tok: Tok::Word(input[start..i].to_string()), start, end: i });
            }
            _ => return Err(err(start, "unexpected character")),
        }
    }
    Ok(out)
}

enum Operand {
    Field(FieldPath),
    Literal(Value),
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    clause_start: usize,
}

const KEYWORDS: &[&str] = &["and", "or", "not", "eq", "ne", "gt", "ge", "lt", "le"];

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Token { tok: Tok::Word(w), .. }) => Some(w.as_str()),
            _ => None,
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterSyntaxError {
        let (position, end) = match self.peek() {
            Some(t) => (t.start, t.end),
            None => (self.input.len(), self.input.len()),
        };
        let start = self.clause_start.min(position);
        FilterSyntaxError {
            clause: self.input[start..end].trim().to_string(),
            position,
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), FilterSyntaxError> {
        match self.peek() {
            Some(t) if t.tok == tok => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, FilterSyntaxError> {
        let mut left = self.parse_and()?;
        while self.peek_word() == Some("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, FilterSyntaxError> {
        let mut left = self.parse_unary()?;
        while self.peek_word() == Some("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Predicate, FilterSyntaxError> {
        if let Some(t) = self.peek() {
            self.clause_start = t.start;
        }
        if self.peek_word() == Some("not") {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, FilterSyntaxError> {
        if matches!(self.peek(), Some(Token { tok: Tok::LParen, .. })) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Tok::RParen, "')'")?;
            return Ok(inner);
        }
        let is_call = matches!(self.tokens.get(self.pos + 1), Some(Token { tok: Tok::LParen, .. }));
        if is_call {
            if let Some(func) = self.peek_word().and_then(TextFn::from_name) {
                return self.parse_call(func);
            }
        }
        self.parse_comparison()
    }

    fn parse_call(&mut self, func: TextFn) -> Result<Predicate, FilterSyntaxError> {
        self.pos += 2;
        let first = self.parse_operand()?;
        self.expect(Tok::Comma, "','")?;
        let second = self.parse_operand()?;
        self.expect(Tok::RParen, "')'")?;
        // substringof('x', field) puts the needle first
        let (field, needle) = match (first, second) {
            (Operand::Field(f), Operand::Literal(Value::String(s))) => (f, s),
            (Operand::Literal(Value::String(s)), Operand::Field(f)) => (f, s),
            _ => {
                self.pos -= 1;
                return Err(self.error(format!("{} takes a field and a string literal", func.name())));
            }
        };
        Ok(Predicate::Text { func, field, value: needle })
    }

    fn parse_comparison(&mut self) -> Result<Predicate, FilterSyntaxError> {
        let left = self.parse_operand()?;
        let op = match self.peek_word().and_then(CmpOp::from_keyword) {
            Some(op) => op,
            None => return Err(self.error("expected a comparison operator (eq, ne, gt, ge, lt, le)")),
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        match (left, right) {
            (Operand::Field(field), Operand::Literal(value)) => Ok(Predicate::Compare { field, op, value }),
            (Operand::Literal(value), Operand::Field(field)) => Ok(Predicate::Compare { field, op: op.flipped(), value }),
            _ => {
                self.pos -= 1;
                Err(self.error("a comparison needs one field and one literal"))
            }
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, FilterSyntaxError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of filter"));
        };
        let operand = match token.tok {
            Tok::Str(s) => Operand::Literal(Value::String(s)),
            Tok::Num(n) => Operand::Literal(Value::Number(n)),
            Tok::Word(w) => match w.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "null" => Operand::Literal(Value::Null),
                kw if KEYWORDS.contains(&kw) => return Err(self.error(format!("expected a field or literal, found '{}'", kw))),
                path => match FieldPath::parse(path) {
                    Some(p) => Operand::Field(p),
                    None => return Err(self.error(format!("invalid field path '{}'", path))),
                },
            },
            _ => return Err(self.error("expected a field or literal")),
        };
        self.pos += 1;
        Ok(operand)
    }
}

/// Compile a `$filter` expression.
pub fn parse_filter(input: &str) -> Result<Predicate, FilterSyntaxError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
        clause_start: 0,
    };
    if parser.peek().is_none() {
        return Err(parser.error("empty filter"));
    }
    let predicate = parser.parse_or()?;
    if parser.peek().is_some() {
        if let Some(t) = parser.peek() {
            parser.clause_start = t.start;
        }
        return Err(parser.error("unexpected trailing input"));
    }
    tracing::debug!(filter = %input, predicate = %predicate, "parsed $filter");
    Ok(predicate)
}
