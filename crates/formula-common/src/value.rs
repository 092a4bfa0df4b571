//! The cell-value algebra (§3, §4.2): a closed sum type for what a cell can
//! hold, plus the Excel error-code taxonomy that embeds in it.

use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The seven standard Excel error codes a cell can carry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Div0,
    Na,
    Value,
    Ref,
    Name,
    Num,
    Null,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Na => "#N/A",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::Null => "#NULL!",
        })
    }
}

impl ErrorKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim() {
            "#DIV/0!" => ErrorKind::Div0,
            "#N/A" => ErrorKind::Na,
            "#VALUE!" => ErrorKind::Value,
            "#REF!" => ErrorKind::Ref,
            "#NAME?" => ErrorKind::Name,
            "#NUM!" => ErrorKind::Num,
            "#NULL!" => ErrorKind::Null,
            _ => return None,
        })
    }
}

/// One run of rich text. Styling beyond bold/italic is not modeled; the
/// evaluator and printer only ever need the flattened plain-text projection
/// (Open Question (a), see DESIGN.md).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextSegment {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

/// A cell's value. Closed sum type per §3.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(Decimal),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
    RichText(Vec<TextSegment>),
    /// Formula source text plus an optional cached evaluation result.
    Formula(String, Option<Box<CellValue>>),
    Error(ErrorKind),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, ""),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::DateTime(dt) => write!(f, "{dt}"),
            CellValue::RichText(segs) => {
                for seg in segs {
                    write!(f, "{}", seg.text)?;
                }
                Ok(())
            }
            CellValue::Formula(text, cached) => match cached {
                Some(v) => write!(f, "{v}"),
                None => write!(f, "{text}"),
            },
            CellValue::Error(k) => write!(f, "{k}"),
        }
    }
}

impl CellValue {
    /// The flattened plain-text projection used wherever a `CellValue`
    /// needs to participate in text coercion (Open Question (a)).
    pub fn plain_text(&self) -> String {
        match self {
            CellValue::RichText(segs) => segs.iter().map(|s| s.text.as_str()).collect(),
            other => other.to_string(),
        }
    }

    pub fn kind(&self) -> crate::error::CellKind {
        use crate::error::CellKind;
        match self {
            CellValue::Empty => CellKind::Empty,
            CellValue::Number(_) => CellKind::Number,
            CellValue::Text(_) => CellKind::Text,
            CellValue::Bool(_) => CellKind::Bool,
            CellValue::DateTime(_) => CellKind::DateTime,
            CellValue::RichText(_) => CellKind::RichText,
            CellValue::Formula(..) => CellKind::Formula,
            CellValue::Error(_) => CellKind::Error,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => !n.is_zero(),
            CellValue::Text(s) => !s.is_empty(),
            CellValue::RichText(segs) => !segs.is_empty(),
            CellValue::Empty => false,
            CellValue::Error(_) => false,
            CellValue::DateTime(_) => true,
            CellValue::Formula(_, Some(cached)) => cached.is_truthy(),
            CellValue::Formula(_, None) => false,
        }
    }
}

/// An opaque handle to host-owned style information. The core never
/// interprets it; it exists only so `Cell` can round-trip style alongside
/// value.
pub type StyleHandle = u64;

/// A cell: one value plus style metadata opaque to the core.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub style: Option<StyleHandle>,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Cell { value, style: None }
    }

    pub fn empty() -> Self {
        Cell::new(CellValue::Empty)
    }

    pub fn with_style(value: CellValue, style: StyleHandle) -> Self {
        Cell {
            value,
            style: Some(style),
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::empty()
    }
}
