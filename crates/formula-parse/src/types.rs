use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use formula_common::value::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaDialect {
    Excel,
    OpenFormula,
}

impl Default for FormulaDialect {
    fn default() -> Self {
        FormulaDialect::Excel
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsingError {
    InvalidReference(String),
    /// Any other syntax-level failure (tokenizer/parser), flattened to a
    /// message; `crate::parser::ParserError` keeps the richer `position`
    /// field for callers that need it.
    Syntax(String),
}

impl Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingError::InvalidReference(msg) => write!(f, "invalid reference: {msg}"),
            ParsingError::Syntax(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ParsingError {}

impl From<crate::parser::ParserError> for ParsingError {
    fn from(e: crate::parser::ParserError) -> Self {
        ParsingError::Syntax(e.to_string())
    }
}

/// A literal value as it appears in surface syntax, before resolution into
/// `formula_common::value::CellValue`/`rust_decimal::Decimal`. Numbers stay
/// `f64` at this layer (matching the tokenizer's own numeral parsing); the
/// resolver converts them to `Decimal` when building the typed `TExpr`.
#[derive(Debug, Clone)]
pub enum LiteralValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorKind),
}

impl PartialEq for LiteralValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LiteralValue::Number(a), LiteralValue::Number(b)) => a.to_bits() == b.to_bits(),
            (LiteralValue::Text(a), LiteralValue::Text(b)) => a == b,
            (LiteralValue::Boolean(a), LiteralValue::Boolean(b)) => a == b,
            (LiteralValue::Error(a), LiteralValue::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LiteralValue {}

impl Hash for LiteralValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            LiteralValue::Number(n) => {
                state.write_u8(0);
                state.write_u64(n.to_bits());
            }
            LiteralValue::Text(s) => {
                state.write_u8(1);
                s.hash(state);
            }
            LiteralValue::Boolean(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            LiteralValue::Error(e) => {
                state.write_u8(3);
                (*e as u8).hash(state);
            }
        }
    }
}

impl Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::Text(s) => write!(f, "{s}"),
            LiteralValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            LiteralValue::Error(e) => write!(f, "{e}"),
        }
    }
}
