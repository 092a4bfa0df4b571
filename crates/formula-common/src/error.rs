//! Cell-decoding errors.
//!
//! Mirrors the hand-rolled `Display`+`Error` shape used throughout this
//! codebase: a small `kind` enum plus a struct that carries enough context
//! to render a useful message without pulling in a derive macro.

use std::{error::Error, fmt};

/// The shape of a `CellValue`, used to describe type mismatches without
/// requiring the actual value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CellKind {
    Empty,
    Number,
    Text,
    Bool,
    DateTime,
    RichText,
    Formula,
    Error,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellKind::Empty => "Empty",
            CellKind::Number => "Number",
            CellKind::Text => "Text",
            CellKind::Bool => "Bool",
            CellKind::DateTime => "DateTime",
            CellKind::RichText => "RichText",
            CellKind::Formula => "Formula",
            CellKind::Error => "Error",
        })
    }
}

/// Failure decoding a `Cell` into a typed value (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A strict decoder saw a variant other than the one it requires.
    TypeMismatch { expected: CellKind, actual: CellKind },
    /// `decodeAsInt` saw a `Number` that is not a valid integer.
    NotAnInteger,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {expected}, found {actual}")
            }
            CodecError::NotAnInteger => write!(f, "value is not a valid integer"),
        }
    }
}

impl Error for CodecError {}
