//! The evaluator's externally-visible error taxonomy (§6, §7).
//!
//! Hand-rolled `Display`+`Error`, matching `formula-common::error::CodecError`
//! and its own non-`thiserror` common-crate error style.

use std::fmt;

use formula_common::address::ARef;
use formula_common::error::CodecError;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// General evaluation failure; `context` adds function-specific detail
    /// (dimensions, iteration counts, etc.) per §7.
    EvalFailed {
        message: String,
        context: Option<String>,
    },
    /// `#DIV/0!`. The operand strings are the printer's rendering of the
    /// numerator/denominator expressions, per §4.4.
    DivByZero { numerator: String, denominator: String },
    /// Typing violation, rendered like `#VALUE!`.
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
    },
    /// Cell-decoding failure surfaced from a `Ref`'s attached decoder.
    CodecFailed { address: ARef, cause: CodecError },
    /// A cycle in the dependency graph; carries a closed walk (first node
    /// repeated at the end).
    CircularRef { path: Vec<ARef> },
    /// A row/column subscript fell outside the addressed range, rendered
    /// like `#REF!` (e.g. `INDEX`'s bounds check, §4.4).
    OutOfBounds { message: String, bounds: String },
}

impl EvalError {
    pub fn failed(message: impl Into<String>) -> Self {
        EvalError::EvalFailed {
            message: message.into(),
            context: None,
        }
    }

    pub fn failed_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        EvalError::EvalFailed {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// A subscript (row/column/index) landed outside the bounds it was
    /// checked against; surfaces as `#REF!` rather than `#VALUE!`.
    pub fn out_of_bounds(message: impl Into<String>, bounds: impl Into<String>) -> Self {
        EvalError::OutOfBounds {
            message: message.into(),
            bounds: bounds.into(),
        }
    }

    /// The Excel-style error token this failure would surface as, when
    /// embedded in a cell (§7 "Cell-level errors").
    pub fn as_cell_error(&self) -> formula_common::value::ErrorKind {
        use formula_common::value::ErrorKind;
        match self {
            EvalError::DivByZero { .. } => ErrorKind::Div0,
            EvalError::TypeMismatch { .. } => ErrorKind::Value,
            EvalError::CodecFailed { .. } => ErrorKind::Value,
            EvalError::CircularRef { .. } => ErrorKind::Ref,
            EvalError::OutOfBounds { .. } => ErrorKind::Ref,
            EvalError::EvalFailed { message, .. } => {
                if message.contains("#N/A") || message.ends_with("not found") {
                    ErrorKind::Na
                } else {
                    ErrorKind::Value
                }
            }
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::EvalFailed { message, context } => match context {
                Some(ctx) => write!(f, "{message} ({ctx})"),
                None => write!(f, "{message}"),
            },
            EvalError::DivByZero { numerator, denominator } => {
                write!(f, "#DIV/0!: {numerator} / {denominator}")
            }
            EvalError::TypeMismatch {
                function,
                expected,
                actual,
            } => write!(f, "#VALUE!: {function} expected {expected}, got {actual}"),
            EvalError::CodecFailed { address, cause } => {
                write!(f, "failed to decode {}: {cause}", address.to_a1())
            }
            EvalError::CircularRef { path } => {
                let rendered: Vec<String> = path.iter().map(|a| a.to_a1()).collect();
                write!(f, "circular reference: {}", rendered.join(" -> "))
            }
            EvalError::OutOfBounds { message, bounds } => write!(f, "#REF!: {message} ({bounds})"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<CodecError> for EvalError {
    fn from(_: CodecError) -> Self {
        // Never constructed directly; callers attach the address via
        // `EvalError::CodecFailed` themselves so the message can reference
        // the failing cell. Kept for ergonomic `?` in helpers that don't
        // have the address in scope (falls back to a generic message).
        EvalError::EvalFailed {
            message: "cell decode failed".to_string(),
            context: None,
        }
    }
}
