//! Label sets and label expressions.
//!
//! Templates advertise a flat set of label atoms (`"linux docker"`).
//! Demand arrives as an expression over atoms:
//!
//! ```text
//! expr   := or
//! or     := and ( "||" and )*
//! and    := unary ( "&&"? unary )*      adjacent atoms are conjoined
//! unary  := "!" unary | "(" expr ")" | atom
//! ```
//!
//! Expressions come from untrusted callers, so both their length and
//! nesting depth are bounded.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::LabelError;

/// Longest label expression accepted, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Deepest nesting of `!` and `(` accepted.
pub const MAX_NESTING: usize = 64;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&&|\|\||!|\(|\)|[^\s&|!()]+").expect("static token pattern")
});

/// Sorted, de-duplicated set of label atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    /// Split a whitespace-separated label string into atoms.
    pub fn parse(labels: &str) -> Self {
        Self(labels.split_whitespace().map(str::to_string).collect())
    }

    pub fn contains(&self, atom: &str) -> bool {
        self.0.contains(atom)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for atom in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(atom)?;
            first = false;
        }
        Ok(())
    }
}

/// Decides whether a requested label expression is satisfied by a label set.
pub trait LabelMatcher: Send + Sync {
    fn matches(&self, expression: &str, labels: &LabelSet) -> Result<bool, LabelError>;
}

/// Default matcher: boolean expressions over label atoms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionMatcher;

impl LabelMatcher for ExpressionMatcher {
    fn matches(&self, expression: &str, labels: &LabelSet) -> Result<bool, LabelError> {
        let expr = LabelExpr::parse(expression)?;
        Ok(expr.eval(labels))
    }
}

/// Parsed label expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelExpr {
    Atom(String),
    Not(Box<LabelExpr>),
    And(Box<LabelExpr>, Box<LabelExpr>),
    Or(Box<LabelExpr>, Box<LabelExpr>),
}

impl LabelExpr {
    pub fn parse(expression: &str) -> Result<Self, LabelError> {
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(LabelError::TooLong {
                len: expression.len(),
                max: MAX_EXPRESSION_LEN,
            });
        }
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(LabelError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        if let Some(tok) = parser.peek() {
            return Err(LabelError::UnexpectedToken {
                token: tok.text.clone(),
                offset: tok.offset,
            });
        }
        Ok(expr)
    }

    pub fn eval(&self, labels: &LabelSet) -> bool {
        match self {
            LabelExpr::Atom(atom) => labels.contains(atom),
            LabelExpr::Not(inner) => !inner.eval(labels),
            LabelExpr::And(a, b) => a.eval(labels) && b.eval(labels),
            LabelExpr::Or(a, b) => a.eval(labels) || b.eval(labels),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    offset: usize,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, LabelError> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for m in TOKEN.find_iter(expression) {
        let gap = &expression[last_end..m.start()];
        if let Some(stray) = gap.trim_start().chars().next() {
            let offset = last_end + (gap.len() - gap.trim_start().len());
            return Err(LabelError::UnexpectedToken {
                token: stray.to_string(),
                offset,
            });
        }
        tokens.push(Token {
            text: m.as_str().to_string(),
            offset: m.start(),
        });
        last_end = m.end();
    }
    let tail = &expression[last_end..];
    if let Some(stray) = tail.trim_start().chars().next() {
        return Err(LabelError::UnexpectedToken {
            token: stray.to_string(),
            offset: last_end + (tail.len() - tail.trim_start().len()),
        });
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

    fn peek_is(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.text == text)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or(&mut self) -> Result<LabelExpr, LabelError> {
        let mut lhs = self.and()?;
        while self.peek_is("||") {
            self.pos += 1;
            let rhs = self.and()?;
            lhs = LabelExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<LabelExpr, LabelError> {
        let mut lhs = self.unary()?;
        loop {
            if self.peek_is("&&") {
                self.pos += 1;
            } else if !self.starts_unary() {
                break;
            }
            let rhs = self.unary()?;
            lhs = LabelExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn starts_unary(&self) -> bool {
        self.peek()
            .is_some_and(|t| !matches!(t.text.as_str(), "&&" | "||" | ")"))
    }

    /// Enter one nesting level, failing past [`MAX_NESTING`].
    fn descend(&mut self) -> Result<(), LabelError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(LabelError::TooDeep { max: MAX_NESTING });
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<LabelExpr, LabelError> {
        // A run of `!` collapses to its parity.
        let mut negations = 0usize;
        while self.peek_is("!") {
            self.pos += 1;
            negations += 1;
        }
        if negations == 0 {
            return self.primary();
        }
        self.descend()?;
        let inner = self.primary();
        self.depth -= 1;
        let inner = inner?;
        Ok(if negations % 2 == 1 {
            LabelExpr::Not(Box::new(inner))
        } else {
            inner
        })
    }

    fn primary(&mut self) -> Result<LabelExpr, LabelError> {
        let tok = self.next().ok_or(LabelError::Unterminated {
            expected: "a label",
        })?;
        match tok.text.as_str() {
            "(" => {
                self.descend()?;
                let inner = self.or();
                self.depth -= 1;
                let inner = inner?;
                match self.next() {
                    Some(close) if close.text == ")" => Ok(inner),
                    Some(other) => Err(LabelError::UnexpectedToken {
                        token: other.text,
                        offset: other.offset,
                    }),
                    None => Err(LabelError::Unterminated { expected: "\")\"" }),
                }
            }
            "&&" | "||" | ")" => Err(LabelError::UnexpectedToken {
                token: tok.text,
                offset: tok.offset,
            }),
            _ => Ok(LabelExpr::Atom(tok.text)),
        }
    }
}
