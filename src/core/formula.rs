//! Derived-metric formulas.
//!
//! A formula such as `(mrr - mrr[-1]) / mrr[-1]` is parsed once into an [`Expr`] tree.
//! The tree yields its exact dependency list through [`Expr::references`] and is
//! evaluated by a post-order walk against a lookup of `(metric key, period) -> value`.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := number | ident offset? | '(' expr ')' | '-' factor
//! offset := '[' '-'? digits ']'
//! ```
//!
//! Offsets address earlier months of the same metric and must lie in `[-12, 0]`.
//! Division by zero evaluates to 0.

use crate::core::period::Period;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// How far back a formula may reach.
pub const MAX_LOOKBACK_MONTHS: i32 = 12;

/// A parse failure, with the byte position where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct FormulaError {
    /// Byte offset into the formula source
    pub position: usize,
    /// What went wrong
    pub message: String,
}

impl FormulaError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Arithmetic operators supported in formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, zero denominators yield 0
    Div,
}

impl BinaryOperator {
    /// Applies the operator. A zero denominator yields 0 rather than NaN or infinity.
    #[must_use]
    pub fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => {
                if right == 0.0 {
                    0.0
                } else {
                    left / right
                }
            }
        }
    }

    const fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }
}

/// A reference to a metric value, relative to the month being evaluated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricRef {
    /// Referenced metric key
    pub key: String,
    /// 0 for the same month, -1 for the previous month, and so on
    pub month_offset: i32,
}

/// Parsed formula tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Constant(f64),
    /// Value of another metric
    MetricRef(MetricRef),
    /// Arithmetic over two sub-expressions
    BinaryOp {
        /// Operator
        op: BinaryOperator,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
}

impl Expr {
    fn binary(op: BinaryOperator, left: Self, right: Self) -> Self {
        Self::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Parses formula source into a tree.
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::new(0, "formula is empty"));
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: source.len(),
        };
        let expr = parser.expr()?;
        if let Some((position, token)) = tokens.get(parser.pos) {
            return Err(FormulaError::new(
                *position,
                format!("unexpected {}", token.describe()),
            ));
        }
        Ok(expr)
    }

    /// Every `(key, offset)` pair the formula reads, deduplicated and sorted.
    #[must_use]
    pub fn references(&self) -> BTreeSet<MetricRef> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<MetricRef>) {
        match self {
            Self::Constant(_) => {}
            Self::MetricRef(metric_ref) => {
                refs.insert(metric_ref.clone());
            }
            Self::BinaryOp { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
        }
    }

    /// Evaluates the tree for `period`. Returns `None` as soon as a referenced value
    /// is unavailable.
    pub fn evaluate<F>(&self, period: Period, lookup: &F) -> Option<f64>
    where
        F: Fn(&str, Period) -> Option<f64>,
    {
        match self {
            Self::Constant(value) => Some(*value),
            Self::MetricRef(metric_ref) => {
                lookup(&metric_ref.key, period.offset(metric_ref.month_offset))
            }
            Self::BinaryOp { op, left, right } => {
                let left = left.evaluate(period, lookup)?;
                let right = right.evaluate(period, lookup)?;
                Some(op.apply(left, right))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::MetricRef(MetricRef { key, month_offset }) if *month_offset == 0 => {
                write!(f, "{key}")
            }
            Self::MetricRef(MetricRef { key, month_offset }) => {
                write!(f, "{key}[{month_offset}]")
            }
            Self::BinaryOp { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(value) => format!("number {value}"),
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Plus => "'+'".to_string(),
            Self::Minus => "'-'".to_string(),
            Self::Star => "'*'".to_string(),
            Self::Slash => "'/'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if !(d.is_ascii_digit() || d == '.') {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let text = &source[start..end];
            let value = text
                .parse::<f64>()
                .map_err(|_| FormulaError::new(start, format!("invalid number '{text}'")))?;
            if !value.is_finite() {
                return Err(FormulaError::new(start, format!("number '{text}' is out of range")));
            }
            tokens.push((start, Token::Number(value)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if !(d.is_ascii_alphanumeric() || d == '_') {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            tokens.push((start, Token::Ident(source[start..end].to_string())));
            continue;
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            other => {
                return Err(FormulaError::new(
                    start,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        chars.next();
        tokens.push((start, token));
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(position, _)| *position)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.peek().cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, token: Option<&Token>) -> FormulaError {
        token.map_or_else(
            || FormulaError::new(self.end, "unexpected end of formula"),
            |token| FormulaError::new(self.position(), format!("unexpected {}", token.describe())),
        )
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FormulaError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            let position = self.position();
            let found = self.peek().map_or_else(|| "end of formula".to_string(), Token::describe);
            Err(FormulaError::new(
                position,
                format!("expected {} but found {found}", expected.describe()),
            ))
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOperator::Add,
                Some(Token::Minus) => BinaryOperator::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOperator::Mul,
                Some(Token::Slash) => BinaryOperator::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        match self.peek().cloned() {
            Some(Token::Number(value)) => {
                self.pos += 1;
                Ok(Expr::Constant(value))
            }
            Some(Token::Ident(key)) => {
                self.pos += 1;
                let month_offset = self.offset()?;
                Ok(Expr::MetricRef(MetricRef { key, month_offset }))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.factor()?;
                Ok(Expr::binary(
                    BinaryOperator::Sub,
                    Expr::Constant(0.0),
                    operand,
                ))
            }
            other => Err(self.unexpected(other.as_ref())),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn offset(&mut self) -> Result<i32, FormulaError> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(0);
        }
        let start = self.position();
        self.pos += 1;

        let negative = self.peek() == Some(&Token::Minus);
        if negative {
            self.pos += 1;
        }

        let magnitude = match self.next_token() {
            Some(Token::Number(value))
                if value.fract() == 0.0
                    && (0.0..=f64::from(MAX_LOOKBACK_MONTHS)).contains(&value) =>
            {
                value as i32
            }
            _ => {
                return Err(FormulaError::new(
                    start,
                    format!("month offset must be an integer between -{MAX_LOOKBACK_MONTHS} and 0"),
                ));
            }
        };
        self.expect(&Token::RBracket)?;

        if magnitude != 0 && !negative {
            return Err(FormulaError::new(
                start,
                "formulas cannot reference future months",
            ));
        }
        Ok(if negative { -magnitude } else { magnitude })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use std::collections::HashMap;

    fn metric(key: &str, month_offset: i32) -> MetricRef {
        MetricRef {
            key: key.to_string(),
            month_offset,
        }
    }

    #[test]
    fn test_parse_respects_precedence() {
        let expr = Expr::parse("a + b * c - d / 2").unwrap();
        assert_eq!(expr.to_string(), "((a + (b * c)) - (d / 2))");
    }

    #[test]
    fn test_parse_parentheses_and_offsets() {
        let expr = Expr::parse("(mrr - mrr[-1]) / mrr[-1]").unwrap();
        assert_eq!(expr.to_string(), "((mrr - mrr[-1]) / mrr[-1])");

        let refs: Vec<MetricRef> = expr.references().into_iter().collect();
        assert_eq!(refs, vec![metric("mrr", -1), metric("mrr", 0)]);
    }

    #[test]
    fn test_parse_unary_minus_and_zero_offset() {
        let expr = Expr::parse("-revenue[0] * 2.5").unwrap();
        assert_eq!(expr.to_string(), "((0 - revenue) * 2.5)");
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = Expr::parse("mrr +").unwrap_err();
        assert_eq!(err.position, 5);
        assert!(err.message.contains("end of formula"));

        let err = Expr::parse("mrr $ 2").unwrap_err();
        assert_eq!(err.position, 4);

        let err = Expr::parse("(mrr - churned_mrr").unwrap_err();
        assert!(err.message.contains("expected ')'"));

        let err = Expr::parse("mrr churned_mrr").unwrap_err();
        assert_eq!(err.position, 4);

        assert!(Expr::parse("   ").is_err());
        assert!(Expr::parse("1..2").is_err());
    }

    #[test]
    fn test_parse_rejects_literal_that_overflows() {
        let huge = format!("9{}", "9".repeat(400));
        let err = Expr::parse(&format!("{huge} - {huge}")).unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("out of range"));

        assert!(Expr::parse(&format!("{} * 2", "9".repeat(300))).is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_offsets() {
        assert!(Expr::parse("mrr[1]").unwrap_err().message.contains("future"));
        assert!(Expr::parse("mrr[-13]").is_err());
        assert!(Expr::parse("mrr[-1.5]").is_err());
        assert!(Expr::parse("mrr[-1").is_err());
        assert!(Expr::parse("mrr[-12]").is_ok());
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        assert_eq!(BinaryOperator::Div.apply(10.0, 0.0), 0.0);
        assert_eq!(BinaryOperator::Div.apply(0.0, 0.0), 0.0);
        assert_eq!(BinaryOperator::Div.apply(10.0, 4.0), 2.5);
    }

    #[test]
    fn test_evaluate_with_lookup() {
        let january = Period::new(2026, 1).unwrap();
        let mut values = HashMap::new();
        values.insert(("mrr".to_string(), january), 110.0);
        values.insert(("mrr".to_string(), january.offset(-1)), 100.0);
        let lookup = |key: &str, period: Period| values.get(&(key.to_string(), period)).copied();

        let growth = Expr::parse("(mrr - mrr[-1]) / mrr[-1]").unwrap();
        let value = growth.evaluate(january, &lookup).unwrap();
        assert!((value - 0.1).abs() < 1e-12);

        let missing = Expr::parse("mrr + churned_mrr").unwrap();
        assert!(missing.evaluate(january, &lookup).is_none());
    }

    #[test]
    fn test_evaluate_zero_denominator_formula() {
        let period = Period::new(2026, 3).unwrap();
        let lookup = |key: &str, _: Period| match key {
            "churned_mrr" => Some(500.0),
            "mrr_start_of_month" => Some(0.0),
            _ => None,
        };
        let churn = Expr::parse("churned_mrr / mrr_start_of_month").unwrap();
        assert_eq!(churn.evaluate(period, &lookup), Some(0.0));
    }
}
