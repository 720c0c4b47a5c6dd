//! Boolean condition expressions.
//!
//! A deliberately small language: comparisons between named parameters and
//! decimal literals, combined with `&&`, `||`, `!` and parentheses.
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | "true" | "false" | operand cmp operand
//! cmp     := ">=" | "<=" | ">" | "<" | "==" | "!="
//! operand := IDENT | NUMBER
//! ```
//!
//! Anything outside this grammar is rejected. The literals `true` and
//! `false` are case-sensitive; `True` is an ordinary identifier.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::Parameters;

/// Why an expression could not be parsed or evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("expected {expected} at offset {offset}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("missing parameter {0:?}")]
    MissingParameter(String),

    #[error("parameter {name:?} is not numeric: {value:?}")]
    NotNumeric { name: String, value: String },
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl Comparison {
    fn apply(self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Parameter(String),
    Literal(Decimal),
}

impl Operand {
    fn resolve(&self, params: &Parameters) -> Result<Decimal, ExpressionError> {
        match self {
            Self::Parameter(name) => params.decimal(name),
            Self::Literal(value) => Ok(*value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Bool(bool),
    Compare {
        lhs: Operand,
        op: Comparison,
        rhs: Operand,
    },
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    fn evaluate(&self, params: &Parameters) -> Result<bool, ExpressionError> {
        match self {
            Self::Bool(value) => Ok(*value),
            Self::Compare { lhs, op, rhs } => {
                Ok(op.apply(lhs.resolve(params)?, rhs.resolve(params)?))
            }
            Self::Not(inner) => Ok(!inner.evaluate(params)?),
            Self::And(lhs, rhs) => Ok(lhs.evaluate(params)? && rhs.evaluate(params)?),
            Self::Or(lhs, rhs) => Ok(lhs.evaluate(params)? || rhs.evaluate(params)?),
        }
    }

    fn collect_parameters<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Bool(_) => {}
            Self::Compare { lhs, rhs, .. } => {
                for operand in [lhs, rhs] {
                    if let Operand::Parameter(name) = operand
                        && !out.contains(&name.as_str())
                    {
                        out.push(name);
                    }
                }
            }
            Self::Not(inner) => inner.collect_parameters(out),
            Self::And(lhs, rhs) | Self::Or(lhs, rhs) => {
                lhs.collect_parameters(out);
                rhs.collect_parameters(out);
            }
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parses `source` into an expression tree.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] describing the first token that does
    /// not fit the grammar.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::UnexpectedToken {
                expected: "end of expression",
                found: token.kind.to_string(),
                offset: token.offset,
            });
        }

        Ok(Self { root })
    }

    /// Evaluates the expression against `params`.
    ///
    /// `&&` and `||` short-circuit, so a parameter on the untaken side of
    /// an operator does not have to exist.
    pub fn evaluate(&self, params: &Parameters) -> Result<bool, ExpressionError> {
        self.root.evaluate(params)
    }

    /// Names of the parameters referenced by the expression, in order of
    /// first appearance.
    pub fn parameters(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_parameters(&mut out);
        out
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Number(Decimal),
    True,
    False,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Cmp(Comparison),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier {name:?}"),
            Self::Number(value) => write!(f, "number {value}"),
            Self::True => f.write_str("`true`"),
            Self::False => f.write_str("`false`"),
            Self::And => f.write_str("`&&`"),
            Self::Or => f.write_str("`||`"),
            Self::Not => f.write_str("`!`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::Cmp(op) => write!(f, "`{}`", op.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let offset = i;
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        let kind = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                TokenKind::LParen
            }
            b')' => {
                i += 1;
                TokenKind::RParen
            }
            b'&' if next == Some(b'&') => {
                i += 2;
                TokenKind::And
            }
            b'|' if next == Some(b'|') => {
                i += 2;
                TokenKind::Or
            }
            b'>' | b'<' | b'=' | b'!' if next == Some(b'=') => {
                i += 2;
                TokenKind::Cmp(match c {
                    b'>' => Comparison::Ge,
                    b'<' => Comparison::Le,
                    b'=' => Comparison::Eq,
                    _ => Comparison::Ne,
                })
            }
            b'>' => {
                i += 1;
                TokenKind::Cmp(Comparison::Gt)
            }
            b'<' => {
                i += 1;
                TokenKind::Cmp(Comparison::Lt)
            }
            b'!' => {
                i += 1;
                TokenKind::Not
            }
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                number(&source[offset..i])?
            }
            b'-' if next.is_some_and(|n| n.is_ascii_digit() || n == b'.') => {
                i = scan_number(bytes, i + 1);
                number(&source[offset..i])?
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                match &source[offset..i] {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    name => TokenKind::Ident(name.to_string()),
                }
            }
            _ => {
                let ch = source[offset..].chars().next().unwrap_or_default();
                return Err(ExpressionError::UnexpectedChar { ch, offset });
            }
        };

        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    i
}

fn number(text: &str) -> Result<TokenKind, ExpressionError> {
    Decimal::from_str(text)
        .map(TokenKind::Number)
        .map_err(|_| ExpressionError::InvalidNumber(text.to_string()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.and()?;
        while self.peek() == Some(&TokenKind::Or) {
            self.pos += 1;
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        while self.peek() == Some(&TokenKind::And) {
            self.pos += 1;
            node = Node::And(Box::new(node), Box::new(self.unary()?));
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == Some(&TokenKind::Not) {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let token = self.next("a condition")?;
        match token.kind {
            TokenKind::LParen => {
                let inner = self.or()?;
                let close = self.next("`)`")?;
                if close.kind != TokenKind::RParen {
                    return Err(ExpressionError::UnexpectedToken {
                        expected: "`)`",
                        found: close.kind.to_string(),
                        offset: close.offset,
                    });
                }
                Ok(inner)
            }
            TokenKind::True => Ok(Node::Bool(true)),
            TokenKind::False => Ok(Node::Bool(false)),
            TokenKind::Ident(_) | TokenKind::Number(_) => {
                let lhs = operand(token)?;
                let op = self.next("a comparison operator")?;
                let TokenKind::Cmp(op) = op.kind else {
                    return Err(ExpressionError::UnexpectedToken {
                        expected: "a comparison operator",
                        found: op.kind.to_string(),
                        offset: op.offset,
                    });
                };
                let rhs = operand(self.next("a parameter or number")?)?;
                Ok(Node::Compare { lhs, op, rhs })
            }
            other => Err(ExpressionError::UnexpectedToken {
                expected: "a condition",
                found: other.to_string(),
                offset: token.offset,
            }),
        }
    }
}

fn operand(token: Token) -> Result<Operand, ExpressionError> {
    match token.kind {
        TokenKind::Ident(name) => Ok(Operand::Parameter(name)),
        TokenKind::Number(value) => Ok(Operand::Literal(value)),
        other => Err(ExpressionError::UnexpectedToken {
            expected: "a parameter or number",
            found: other.to_string(),
            offset: token.offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).into()))
            .collect()
    }

    fn eval(source: &str, p: &Parameters) -> Result<bool, ExpressionError> {
        Expression::parse(source)?.evaluate(p)
    }

    #[test]
    fn equal_parameters_satisfy_ge() {
        let p = params(&[("A", "5"), ("B", "5")]);
        assert_eq!(eval("A >= B", &p), Ok(true));
    }

    #[test]
    fn smaller_parameter_fails_ge() {
        let p = params(&[("A", "1"), ("B", "5")]);
        assert_eq!(eval("A >= B", &p), Ok(false));
    }

    #[test]
    fn all_comparison_operators() {
        let p = params(&[("X", "2")]);
        assert_eq!(eval("X > 1", &p), Ok(true));
        assert_eq!(eval("X < 1", &p), Ok(false));
        assert_eq!(eval("X <= 2", &p), Ok(true));
        assert_eq!(eval("X == 2.0", &p), Ok(true));
        assert_eq!(eval("X != 2", &p), Ok(false));
        assert_eq!(eval("X>=-3", &p), Ok(true));
    }

    #[test]
    fn boolean_combinators_and_precedence() {
        let p = params(&[("Current", "10"), ("High", "12"), ("Low", "9")]);
        assert_eq!(eval("Current >= High || Current <= Low", &p), Ok(false));
        assert_eq!(eval("!(Current >= High) && Current > Low", &p), Ok(true));
        // && binds tighter than ||
        assert_eq!(eval("true || false && false", &p), Ok(true));
        assert_eq!(eval("(true || false) && false", &p), Ok(false));
    }

    #[test]
    fn literals_are_case_sensitive() {
        let p = Parameters::default();
        assert_eq!(eval("true", &p), Ok(true));
        assert_eq!(eval("false", &p), Ok(false));
        // `True` is an identifier, and a bare identifier is not a condition.
        assert!(matches!(
            eval("True", &p),
            Err(ExpressionError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let p = params(&[("A", "1")]);
        assert_eq!(
            eval("A >= B", &p),
            Err(ExpressionError::MissingParameter("B".into()))
        );
    }

    #[test]
    fn short_circuit_skips_missing_parameter() {
        let p = params(&[("A", "1")]);
        assert_eq!(eval("A > 0 || B > 0", &p), Ok(true));
    }

    #[test]
    fn non_numeric_parameter_is_an_error() {
        let p = params(&[("A", "lots")]);
        assert!(matches!(
            eval("A > 1", &p),
            Err(ExpressionError::NotNumeric { .. })
        ));
    }

    #[test]
    fn rejects_template_syntax() {
        assert!(matches!(
            Expression::parse("{{ ge .Current .Target }}"),
            Err(ExpressionError::UnexpectedChar { ch: '{', offset: 0 })
        ));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(Expression::parse("   "), Err(ExpressionError::Empty));
        assert!(matches!(
            Expression::parse("A >="),
            Err(ExpressionError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            Expression::parse("A B"),
            Err(ExpressionError::UnexpectedToken { offset: 2, .. })
        ));
        assert!(matches!(
            Expression::parse("(A > 1"),
            Err(ExpressionError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            Expression::parse("A > 1)"),
            Err(ExpressionError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Expression::parse("1.2.3 > A"),
            Err(ExpressionError::InvalidNumber(_))
        ));
        assert!(matches!(
            Expression::parse("A & B"),
            Err(ExpressionError::UnexpectedChar { ch: '&', .. })
        ));
    }

    #[test]
    fn reports_referenced_parameters() {
        let expr = Expression::parse("Current >= High || Current <= Low || 1 > 0").unwrap();
        assert_eq!(expr.parameters(), vec!["Current", "High", "Low"]);
    }

    #[test]
    fn decimal_literals_compare_exactly() {
        let mut p = Parameters::default();
        p.set("Price", dec!(0.1) + dec!(0.2));
        assert_eq!(eval("Price == 0.3", &p), Ok(true));
    }
}
