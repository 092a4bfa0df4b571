//! The typed expression tree (§3, §4.3).
//!
//! A hypothetical `TExpr<A>` would be GADT-shaped: the type parameter
//! carries the statically-known result type of the node. Rust has no direct
//! equivalent, so this is encoded as a single monomorphic enum carrying a
//! runtime kind, with [`TExpr::result_type`] recovering the "static result
//! type" property without evaluating the node.

use std::sync::Arc;

use formula_common::address::{Anchor, ARef, CellRange};

use crate::function::FunctionSpec;

/// The decoder attached to a `Ref`/`SheetRef` node (§4.2 Invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    NumberStrict,
    TextStrict,
    BoolStrict,
    DateTimeStrict,
    /// `Empty -> Number(0)`, formula cache unwrapped; used for bare numeric
    /// references.
    ResolvedValue,
    AsString,
    AsInt,
    AsDate,
    /// Coercing boolean decode: `Bool` passthrough, `Number != 0`, text
    /// `"TRUE"`/`"FALSE"` (case-insensitive); otherwise `TypeMismatch`.
    AsBool,
}

/// The statically-known result type of a node, recoverable without
/// evaluating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultType {
    Number,
    Int,
    Text,
    Bool,
    Date,
    DateTime,
    Array,
    /// Result type depends on runtime values (e.g. `IF`, `INDEX`).
    Any,
}

/// Where an `Aggregate` node reads its cells from.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(CellRange),
    CrossSheet(String, CellRange),
}

/// A typed spreadsheet expression node.
///
/// Immutable after construction (Invariant 5, §3): every transformation
/// (shift, print) produces a new tree rather than mutating this one.
#[derive(Debug, Clone, PartialEq)]
pub enum TExpr {
    Lit(formula_common::value::CellValue),

    /// A reference already resolved to a concrete decoder.
    Ref {
        addr: ARef,
        anchor: Anchor,
        decoder: DecoderKind,
    },
    /// A reference whose decoder has not yet been chosen by the resolver.
    /// Reaching the evaluator in this state is a contract violation
    /// (Invariant 2, §3) reported as `EvalFailed`.
    PolyRef { addr: ARef, anchor: Anchor },

    SheetRef {
        sheet: String,
        addr: ARef,
        anchor: Anchor,
        decoder: DecoderKind,
    },
    SheetPolyRef {
        sheet: String,
        addr: ARef,
        anchor: Anchor,
    },

    RangeRef {
        range: CellRange,
    },
    SheetRange {
        sheet: String,
        range: CellRange,
    },

    Add(Box<TExpr>, Box<TExpr>),
    Sub(Box<TExpr>, Box<TExpr>),
    Mul(Box<TExpr>, Box<TExpr>),
    Div(Box<TExpr>, Box<TExpr>),
    /// The `&` operator: fold-left string append (§4.4 "Concatenate").
    Concat(Box<TExpr>, Box<TExpr>),

    And(Box<TExpr>, Box<TExpr>),
    Or(Box<TExpr>, Box<TExpr>),
    Not(Box<TExpr>),

    Eq(Box<TExpr>, Box<TExpr>),
    Neq(Box<TExpr>, Box<TExpr>),
    Lt(Box<TExpr>, Box<TExpr>),
    Lte(Box<TExpr>, Box<TExpr>),
    Gt(Box<TExpr>, Box<TExpr>),
    Gte(Box<TExpr>, Box<TExpr>),

    /// Transparent at print time: exists only to carry typing information
    /// through evaluation (§4.6).
    ToInt(Box<TExpr>),
    DateToSerial(Box<TExpr>),
    DateTimeToSerial(Box<TExpr>),

    /// Evaluates only the chosen branch (§5 Ordering guarantees).
    If {
        cond: Box<TExpr>,
        then_branch: Box<TExpr>,
        else_branch: Box<TExpr>,
    },

    Aggregate {
        name: String,
        location: Location,
    },

    /// Generic function-call node; `spec` carries name/arity/eval-fn.
    Call {
        spec: Arc<FunctionSpec>,
        args: Vec<TExpr>,
    },
}

impl TExpr {
    /// The statically-known result type, per the Design Notes' sanctioned
    /// monomorphic encoding.
    pub fn result_type(&self) -> ResultType {
        match self {
            TExpr::Lit(v) => match v {
                formula_common::value::CellValue::Number(_) => ResultType::Number,
                formula_common::value::CellValue::Text(_) => ResultType::Text,
                formula_common::value::CellValue::Bool(_) => ResultType::Bool,
                formula_common::value::CellValue::DateTime(_) => ResultType::DateTime,
                _ => ResultType::Any,
            },
            TExpr::Ref { decoder, .. } | TExpr::SheetRef { decoder, .. } => match decoder {
                DecoderKind::NumberStrict | DecoderKind::ResolvedValue => ResultType::Number,
                DecoderKind::TextStrict | DecoderKind::AsString => ResultType::Text,
                DecoderKind::BoolStrict => ResultType::Bool,
                DecoderKind::DateTimeStrict => ResultType::DateTime,
                DecoderKind::AsInt => ResultType::Int,
                DecoderKind::AsDate => ResultType::Date,
                DecoderKind::AsBool => ResultType::Bool,
            },
            TExpr::PolyRef { .. } | TExpr::SheetPolyRef { .. } => ResultType::Any,
            TExpr::RangeRef { .. } | TExpr::SheetRange { .. } => ResultType::Array,
            TExpr::Add(..) | TExpr::Sub(..) | TExpr::Mul(..) | TExpr::Div(..) => ResultType::Number,
            TExpr::Concat(..) => ResultType::Text,
            TExpr::And(..) | TExpr::Or(..) | TExpr::Not(..) => ResultType::Bool,
            TExpr::Eq(..)
            | TExpr::Neq(..)
            | TExpr::Lt(..)
            | TExpr::Lte(..)
            | TExpr::Gt(..)
            | TExpr::Gte(..) => ResultType::Bool,
            TExpr::ToInt(_) => ResultType::Int,
            TExpr::DateToSerial(_) => ResultType::Number,
            TExpr::DateTimeToSerial(_) => ResultType::Number,
            TExpr::If { then_branch, .. } => then_branch.result_type(),
            TExpr::Aggregate { .. } => ResultType::Number,
            TExpr::Call { spec, .. } => spec.return_type,
        }
    }

    /// Every direct child node, in evaluation order. Used by the shifter and
    /// dependency extractor to recurse without per-variant glue.
    pub fn children(&self) -> Vec<&TExpr> {
        match self {
            TExpr::Lit(_)
            | TExpr::Ref { .. }
            | TExpr::PolyRef { .. }
            | TExpr::SheetRef { .. }
            | TExpr::SheetPolyRef { .. }
            | TExpr::RangeRef { .. }
            | TExpr::SheetRange { .. }
            | TExpr::Aggregate { .. } => vec![],
            TExpr::Add(a, b)
            | TExpr::Sub(a, b)
            | TExpr::Mul(a, b)
            | TExpr::Div(a, b)
            | TExpr::Concat(a, b)
            | TExpr::And(a, b)
            | TExpr::Or(a, b)
            | TExpr::Eq(a, b)
            | TExpr::Neq(a, b)
            | TExpr::Lt(a, b)
            | TExpr::Lte(a, b)
            | TExpr::Gt(a, b)
            | TExpr::Gte(a, b) => vec![a.as_ref(), b.as_ref()],
            TExpr::Not(a) | TExpr::ToInt(a) | TExpr::DateToSerial(a) | TExpr::DateTimeToSerial(a) => {
                vec![a.as_ref()]
            }
            TExpr::If {
                cond,
                then_branch,
                else_branch,
            } => vec![cond.as_ref(), then_branch.as_ref(), else_branch.as_ref()],
            TExpr::Call { args, .. } => args.iter().collect(),
        }
    }
}
