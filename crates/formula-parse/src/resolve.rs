//! The resolver (§6): turns the untyped surface [`ASTNode`] into a typed
//! [`TExpr`] tree, choosing every `Ref`/`SheetRef`'s decoder from the
//! argument position it lands in and recovering `$`-anchor information the
//! parser's [`ReferenceType`] drops.
//!
//! Resolution and evaluation are split into separate passes here, unlike a
//! single combined dispatch: this module only resolves, leaving evaluation
//! to `formula-eval`. `ReferenceType` only keeps 1-based row/col numbers, so
//! `$`s are read back out of [`ASTNodeType::Reference`]'s preserved
//! `original` token text via [`formula_common::address::parse_a1_cell`].

use std::fmt;

use rust_decimal::Decimal;

use formula_common::address::{ARef, Anchor, CellRange, Column};
use formula_common::value::CellValue;

use formula_eval::ast::{DecoderKind, Location, TExpr};
use formula_eval::function::{ArgKind, FunctionRegistry};

use crate::parser::{ASTNode, ASTNodeType, ReferenceType};

/// The highest row/column index this crate will synthesize for a whole-row
/// or whole-column reference (`A:A`, `3:3`), matching Excel's own worksheet
/// limits (1,048,576 rows / 16,384 columns, §4.8: "whole-column/row
/// references must never be materialized in full" — the evaluator clamps
/// this sentinel against the sheet's used range before ever touching a
/// cell).
const MAX_ROW: u32 = 1_048_575;
const MAX_COL: u32 = 16_383;

/// Functions folded directly into native `TExpr` nodes rather than dispatched
/// through the [`FunctionRegistry`] (§4.3: `IF`/`AND`/`OR`/`NOT` are core
/// language, not registry entries — there is no `FunctionSpec` for them).
const NATIVE_FUNCTIONS: &[&str] = &["IF", "AND", "OR", "NOT"];

/// `SUM`/`COUNT`/`MIN`/`MAX`/`AVERAGE` resolve to [`TExpr::Aggregate`]
/// instead of `Call`; extension of this list is local to the aggregator
/// (§4.7 "extension is local"), so this resolver only knows the same five.
const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "COUNT", "MIN", "MAX", "AVERAGE"];

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    UnknownFunction(String),
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
    UnsupportedReference {
        original: String,
        reason: String,
    },
    InvalidLiteral(String),
    /// An aggregate function's sole argument wasn't a single cell/range
    /// reference (§4.7: `Aggregate` only carries one `Location`).
    AggregateArgument {
        function: String,
        reason: String,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            ResolveError::Arity { function, expected, got } => {
                write!(f, "{function}: expected {expected} argument(s), got {got}")
            }
            ResolveError::UnsupportedReference { original, reason } => {
                write!(f, "unsupported reference '{original}': {reason}")
            }
            ResolveError::InvalidLiteral(msg) => write!(f, "invalid literal: {msg}"),
            ResolveError::AggregateArgument { function, reason } => {
                write!(f, "{function}: {reason}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Resolves a parsed [`ASTNode`] into a typed [`TExpr`], using `registry` to
/// look up non-native function calls (§6 external interfaces).
pub fn resolve(ast: &ASTNode, registry: &FunctionRegistry) -> Result<TExpr, ResolveError> {
    resolve_expr(ast, registry, ArgKind::Any)
}

fn decoder_for(hint: ArgKind) -> DecoderKind {
    match hint {
        ArgKind::Number => DecoderKind::ResolvedValue,
        ArgKind::Int => DecoderKind::AsInt,
        ArgKind::Text => DecoderKind::AsString,
        ArgKind::Bool => DecoderKind::AsBool,
        ArgKind::Date => DecoderKind::AsDate,
        ArgKind::DateTime => DecoderKind::DateTimeStrict,
        ArgKind::Range => DecoderKind::ResolvedValue,
        ArgKind::Any => DecoderKind::ResolvedValue,
    }
}

fn resolve_expr(node: &ASTNode, registry: &FunctionRegistry, hint: ArgKind) -> Result<TExpr, ResolveError> {
    match &node.node_type {
        ASTNodeType::Literal(lit) => resolve_literal(lit),
        ASTNodeType::Reference { original, reference } => resolve_reference(original, reference, hint),
        ASTNodeType::UnaryOp { op, expr } => resolve_unary(op, expr, registry, hint),
        ASTNodeType::BinaryOp { op, left, right } => resolve_binary(op, left, right, registry),
        ASTNodeType::Function { name, args } => resolve_function(name, args, registry),
        ASTNodeType::Array(_) => Err(ResolveError::UnsupportedReference {
            original: node.node_type.to_string(),
            reason: "array literals are not supported".to_string(),
        }),
    }
}

fn resolve_literal(lit: &crate::types::LiteralValue) -> Result<TExpr, ResolveError> {
    use crate::types::LiteralValue;
    let value = match lit {
        LiteralValue::Number(n) => {
            let d = Decimal::from_f64_retain(*n)
                .ok_or_else(|| ResolveError::InvalidLiteral(format!("{n} is not a representable number")))?;
            CellValue::Number(d)
        }
        LiteralValue::Text(s) => CellValue::Text(s.clone()),
        LiteralValue::Boolean(b) => CellValue::Bool(*b),
        LiteralValue::Error(e) => CellValue::Error(*e),
    };
    Ok(TExpr::Lit(value))
}

/// Strips any sheet prefix `original` carries and returns the bare
/// reference text (`"Sheet1!$A$1"` -> `"$A$1"`).
fn strip_sheet_prefix(original: &str) -> String {
    let (_, ref_part) = ReferenceType::extract_sheet_name(original);
    ref_part
}

/// One endpoint of a (possibly whole-row/whole-column) range reference.
/// `fallback` supplies the axis a bare column-only or row-only endpoint is
/// missing: `(0, 0)` for a range's start, `(MAX_COL, MAX_ROW)` for its end.
fn parse_range_endpoint(text: &str, fallback: (u32, u32)) -> Option<(ARef, bool, bool)> {
    if let Some(parsed) = formula_common::address::parse_a1_cell(text) {
        return Some(parsed);
    }

    let bytes = text.as_bytes();
    let mut i = 0;
    let col_abs = bytes.get(i) == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let has_col = i > col_start;
    let col = if has_col { Column::from_letters(&text[col_start..i])? } else { Column(fallback.0) };

    let row_abs = bytes.get(i) == Some(&b'$');
    if row_abs {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let has_row = i > row_start;
    if i != bytes.len() || (!has_col && !has_row) {
        return None;
    }
    let row = if has_row {
        let row_1based: u32 = text[row_start..i].parse().ok()?;
        if row_1based == 0 {
            return None;
        }
        row_1based - 1
    } else {
        fallback.1
    };

    Some((
        ARef::new(col.0, row),
        has_col && col_abs,
        has_row && row_abs,
    ))
}

fn resolve_reference(original: &str, reference: &ReferenceType, hint: ArgKind) -> Result<TExpr, ResolveError> {
    match reference {
        ReferenceType::Cell { sheet, .. } => {
            let bare = strip_sheet_prefix(original);
            let (addr, col_abs, row_abs) = formula_common::address::parse_a1_cell(&bare).ok_or_else(|| {
                ResolveError::UnsupportedReference {
                    original: original.to_string(),
                    reason: "not a valid A1 cell reference".to_string(),
                }
            })?;
            let anchor = Anchor::from_flags(col_abs, row_abs);
            let decoder = decoder_for(hint);
            Ok(match sheet {
                Some(sheet) => TExpr::SheetRef {
                    sheet: sheet.clone(),
                    addr,
                    anchor,
                    decoder,
                },
                None => TExpr::Ref { addr, anchor, decoder },
            })
        }
        ReferenceType::Range { sheet, .. } => {
            let bare = strip_sheet_prefix(original);
            let mut parts = bare.splitn(2, ':');
            let start_text = parts.next().unwrap_or_default();
            let end_text = parts.next().ok_or_else(|| ResolveError::UnsupportedReference {
                original: original.to_string(),
                reason: "range reference missing ':'".to_string(),
            })?;

            let (start, start_col_abs, start_row_abs) = parse_range_endpoint(start_text, (0, 0))
                .ok_or_else(|| ResolveError::UnsupportedReference {
                    original: original.to_string(),
                    reason: "invalid range start".to_string(),
                })?;
            let (end, end_col_abs, end_row_abs) = parse_range_endpoint(end_text, (MAX_COL, MAX_ROW))
                .ok_or_else(|| ResolveError::UnsupportedReference {
                    original: original.to_string(),
                    reason: "invalid range end".to_string(),
                })?;

            let range = CellRange::from_corners(
                start,
                Anchor::from_flags(start_col_abs, start_row_abs),
                end,
                Anchor::from_flags(end_col_abs, end_row_abs),
            );
            Ok(match sheet {
                Some(sheet) => TExpr::SheetRange { sheet: sheet.clone(), range },
                None => TExpr::RangeRef { range },
            })
        }
        ReferenceType::Table(_) => Err(ResolveError::UnsupportedReference {
            original: original.to_string(),
            reason: "structured table references are not supported".to_string(),
        }),
        ReferenceType::NamedRange(name) => Err(ResolveError::UnsupportedReference {
            original: original.to_string(),
            reason: format!("named range '{name}' has no binding in this core"),
        }),
    }
}

/// A reference argument to an aggregate, resolved straight to a [`Location`]
/// rather than a decoded `TExpr` (§4.7).
fn resolve_aggregate_location(node: &ASTNode, function: &str) -> Result<Location, ResolveError> {
    let (original, reference) = match &node.node_type {
        ASTNodeType::Reference { original, reference } => (original, reference),
        _ => {
            return Err(ResolveError::AggregateArgument {
                function: function.to_string(),
                reason: "argument must be a single cell or range reference".to_string(),
            })
        }
    };

    match resolve_reference(original, reference, ArgKind::Range)? {
        TExpr::Ref { addr, anchor, .. } => Ok(Location::Local(CellRange {
            start: addr,
            end: addr,
            start_anchor: anchor,
            end_anchor: anchor,
        })),
        TExpr::SheetRef { sheet, addr, anchor, .. } => Ok(Location::CrossSheet(
            sheet,
            CellRange {
                start: addr,
                end: addr,
                start_anchor: anchor,
                end_anchor: anchor,
            },
        )),
        TExpr::RangeRef { range } => Ok(Location::Local(range)),
        TExpr::SheetRange { sheet, range } => Ok(Location::CrossSheet(sheet, range)),
        _ => unreachable!("resolve_reference only ever returns a reference-shaped TExpr"),
    }
}

fn resolve_unary(
    op: &str,
    expr: &ASTNode,
    registry: &FunctionRegistry,
    hint: ArgKind,
) -> Result<TExpr, ResolveError> {
    match op {
        "-" => {
            let inner = resolve_expr(expr, registry, ArgKind::Number)?;
            Ok(TExpr::Sub(Box::new(TExpr::Lit(CellValue::Number(Decimal::ZERO))), Box::new(inner)))
        }
        "+" => resolve_expr(expr, registry, hint),
        "%" => {
            let inner = resolve_expr(expr, registry, ArgKind::Number)?;
            Ok(TExpr::Div(Box::new(inner), Box::new(TExpr::Lit(CellValue::Number(Decimal::ONE_HUNDRED)))))
        }
        other => Err(ResolveError::UnsupportedReference {
            original: other.to_string(),
            reason: "unknown unary operator".to_string(),
        }),
    }
}

fn resolve_binary(op: &str, left: &ASTNode, right: &ASTNode, registry: &FunctionRegistry) -> Result<TExpr, ResolveError> {
    let numeric = |side: &ASTNode| resolve_expr(side, registry, ArgKind::Number);
    let textual = |side: &ASTNode| resolve_expr(side, registry, ArgKind::Text);
    let any = |side: &ASTNode| resolve_expr(side, registry, ArgKind::Any);

    match op {
        "+" => Ok(TExpr::Add(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        "-" => Ok(TExpr::Sub(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        "*" => Ok(TExpr::Mul(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        "/" => Ok(TExpr::Div(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        "^" => {
            // The parser has no dedicated power node (§4.4): rewrite into a
            // call to the registered `POWER` builtin.
            let spec = registry.get("POWER").ok_or_else(|| ResolveError::UnknownFunction("POWER".to_string()))?;
            Ok(TExpr::Call {
                spec,
                args: vec![numeric(left)?, numeric(right)?],
            })
        }
        "&" => Ok(TExpr::Concat(Box::new(textual(left)?), Box::new(textual(right)?))),
        "=" => Ok(TExpr::Eq(Box::new(any(left)?), Box::new(any(right)?))),
        "<>" => Ok(TExpr::Neq(Box::new(any(left)?), Box::new(any(right)?))),
        "<" => Ok(TExpr::Lt(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        "<=" => Ok(TExpr::Lte(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        ">" => Ok(TExpr::Gt(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        ">=" => Ok(TExpr::Gte(Box::new(numeric(left)?), Box::new(numeric(right)?))),
        other => Err(ResolveError::UnsupportedReference {
            original: other.to_string(),
            reason: "unknown binary operator".to_string(),
        }),
    }
}

fn resolve_function(name: &str, args: &[ASTNode], registry: &FunctionRegistry) -> Result<TExpr, ResolveError> {
    let upper = name.to_ascii_uppercase();

    if AGGREGATE_FUNCTIONS.contains(&upper.as_str()) {
        if args.len() != 1 {
            return Err(ResolveError::Arity {
                function: upper,
                expected: "1".to_string(),
                got: args.len(),
            });
        }
        let location = resolve_aggregate_location(&args[0], &upper)?;
        return Ok(TExpr::Aggregate { name: upper, location });
    }

    if NATIVE_FUNCTIONS.contains(&upper.as_str()) {
        return resolve_native(&upper, args, registry);
    }

    let spec = registry.get(&upper).ok_or_else(|| {
        #[cfg(feature = "tracing")]
        tracing::warn!(function = %upper, "unknown function referenced in formula");
        ResolveError::UnknownFunction(upper.clone())
    })?;
    if !spec.arity.accepts(args.len()) {
        return Err(ResolveError::Arity {
            function: upper,
            expected: format!("{:?}", spec.arity),
            got: args.len(),
        });
    }
    let resolved = args
        .iter()
        .enumerate()
        .map(|(i, a)| resolve_expr(a, registry, spec.arg_spec.kind_at(i)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TExpr::Call { spec, args: resolved })
}

fn resolve_native(name: &str, args: &[ASTNode], registry: &FunctionRegistry) -> Result<TExpr, ResolveError> {
    match name {
        "IF" => {
            if args.len() != 3 {
                return Err(ResolveError::Arity {
                    function: "IF".to_string(),
                    expected: "3".to_string(),
                    got: args.len(),
                });
            }
            Ok(TExpr::If {
                cond: Box::new(resolve_expr(&args[0], registry, ArgKind::Bool)?),
                then_branch: Box::new(resolve_expr(&args[1], registry, ArgKind::Any)?),
                else_branch: Box::new(resolve_expr(&args[2], registry, ArgKind::Any)?),
            })
        }
        "NOT" => {
            if args.len() != 1 {
                return Err(ResolveError::Arity {
                    function: "NOT".to_string(),
                    expected: "1".to_string(),
                    got: args.len(),
                });
            }
            Ok(TExpr::Not(Box::new(resolve_expr(&args[0], registry, ArgKind::Bool)?)))
        }
        "AND" | "OR" => {
            if args.is_empty() {
                return Err(ResolveError::Arity {
                    function: name.to_string(),
                    expected: "at least 1".to_string(),
                    got: 0,
                });
            }
            let mut operands = args
                .iter()
                .map(|a| resolve_expr(a, registry, ArgKind::Bool))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let first = operands.next().unwrap();
            if args.len() == 1 {
                // `AND(x)`/`OR(x)` still need to report `x`'s truthiness as a
                // real boolean, not pass `x` through untyped.
                let identity = TExpr::Lit(CellValue::Bool(name == "AND"));
                return Ok(if name == "AND" {
                    TExpr::And(Box::new(first), Box::new(identity))
                } else {
                    TExpr::Or(Box::new(first), Box::new(identity))
                });
            }
            Ok(operands.fold(first, |acc, next| {
                if name == "AND" {
                    TExpr::And(Box::new(acc), Box::new(next))
                } else {
                    TExpr::Or(Box::new(acc), Box::new(next))
                }
            }))
        }
        other => unreachable!("{other} is not in NATIVE_FUNCTIONS"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use formula_eval::function::DEFAULT_REGISTRY;

    fn resolve_str(formula: &str) -> Result<TExpr, ResolveError> {
        let ast = parse(formula).expect("parses");
        resolve(&ast, &DEFAULT_REGISTRY)
    }

    #[test]
    fn resolves_plain_arithmetic() {
        let expr = resolve_str("1+2*3").unwrap();
        assert!(matches!(expr, TExpr::Add(..)));
    }

    #[test]
    fn resolves_bare_cell_reference_with_resolved_value_decoder() {
        let expr = resolve_str("A1").unwrap();
        match expr {
            TExpr::Ref { addr, anchor, decoder } => {
                assert_eq!(addr, ARef::new(0, 0));
                assert_eq!(anchor, Anchor::Relative);
                assert_eq!(decoder, DecoderKind::ResolvedValue);
            }
            other => panic!("expected Ref, got {other:?}"),
        }
    }

    #[test]
    fn recovers_anchors_from_original_text() {
        let expr = resolve_str("$B$3").unwrap();
        match expr {
            TExpr::Ref { addr, anchor, .. } => {
                assert_eq!(addr, ARef::new(1, 2));
                assert_eq!(anchor, Anchor::Absolute);
            }
            other => panic!("expected Ref, got {other:?}"),
        }
    }

    #[test]
    fn sheet_qualified_reference_becomes_sheet_ref() {
        let expr = resolve_str("Sheet2!A1").unwrap();
        match expr {
            TExpr::SheetRef { sheet, addr, .. } => {
                assert_eq!(sheet, "Sheet2");
                assert_eq!(addr, ARef::new(0, 0));
            }
            other => panic!("expected SheetRef, got {other:?}"),
        }
    }

    #[test]
    fn sum_of_a_range_becomes_aggregate() {
        let expr = resolve_str("SUM(A1:A10)").unwrap();
        match expr {
            TExpr::Aggregate { name, location } => {
                assert_eq!(name, "SUM");
                match location {
                    Location::Local(range) => {
                        assert_eq!(range.start, ARef::new(0, 0));
                        assert_eq!(range.end, ARef::new(0, 9));
                    }
                    other => panic!("expected Local, got {other:?}"),
                }
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
    }

    #[test]
    fn sum_of_a_bare_cell_widens_to_1x1_range() {
        let expr = resolve_str("SUM(A1)").unwrap();
        match expr {
            TExpr::Aggregate { location: Location::Local(range), .. } => {
                assert_eq!(range.start, range.end);
            }
            other => panic!("expected Aggregate over a degenerate range, got {other:?}"),
        }
    }

    #[test]
    fn sum_of_two_arguments_is_rejected() {
        let err = resolve_str("SUM(A1,B1)").unwrap_err();
        assert!(matches!(err, ResolveError::Arity { .. }));
    }

    #[test]
    fn whole_column_range_clamps_to_sentinel_bounds() {
        let expr = resolve_str("SUM(A:A)").unwrap();
        match expr {
            TExpr::Aggregate { location: Location::Local(range), .. } => {
                assert_eq!(range.start, ARef::new(0, 0));
                assert_eq!(range.end, ARef::new(0, MAX_ROW));
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
    }

    #[test]
    fn power_operator_rewrites_to_power_call() {
        let expr = resolve_str("2^3").unwrap();
        match expr {
            TExpr::Call { spec, args } => {
                assert_eq!(spec.name, "POWER");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected Call to POWER, got {other:?}"),
        }
    }

    #[test]
    fn if_resolves_to_native_node() {
        let expr = resolve_str("IF(1>0,\"yes\",\"no\")").unwrap();
        assert!(matches!(expr, TExpr::If { .. }));
    }

    #[test]
    fn and_or_fold_into_binary_chains() {
        let expr = resolve_str("AND(TRUE,TRUE,FALSE)").unwrap();
        match expr {
            TExpr::And(a, b) => {
                assert!(matches!(*a, TExpr::And(..)));
                assert!(matches!(*b, TExpr::Lit(CellValue::Bool(false))));
            }
            other => panic!("expected nested And, got {other:?}"),
        }
    }

    #[test]
    fn unary_minus_desugars_to_subtraction_from_zero() {
        let expr = resolve_str("-A1").unwrap();
        match expr {
            TExpr::Sub(zero, _) => assert!(matches!(*zero, TExpr::Lit(CellValue::Number(n)) if n.is_zero())),
            other => panic!("expected Sub, got {other:?}"),
        }
    }

    #[test]
    fn postfix_percent_desugars_to_division_by_one_hundred() {
        let expr = resolve_str("50%").unwrap();
        match expr {
            TExpr::Div(_, hundred) => {
                assert!(matches!(*hundred, TExpr::Lit(CellValue::Number(n)) if n == Decimal::ONE_HUNDRED));
            }
            other => panic!("expected Div, got {other:?}"),
        }
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = resolve_str("NOSUCHFUNC(1)").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownFunction(_)));
    }

    #[test]
    fn table_reference_is_rejected() {
        let err = resolve_str("Table1[Column1]").unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedReference { .. }));
    }

    #[test]
    fn vlookup_resolves_range_and_lookup_value_arguments() {
        let expr = resolve_str("VLOOKUP(A1,B1:C10,2,FALSE)").unwrap();
        match expr {
            TExpr::Call { spec, args } => {
                assert_eq!(spec.name, "VLOOKUP");
                assert!(matches!(&args[1], TExpr::RangeRef { .. }));
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }
}
