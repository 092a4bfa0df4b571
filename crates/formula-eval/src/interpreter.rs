//! The pure evaluator (§4.4): a total, pattern-directed interpreter over
//! `TExpr`. Never panics on well-formed input; every failure mode is a
//! `Result::Err(EvalError)`.
//!
//! `And`/`Or` short-circuit genuinely (no side effects on the skipped
//! branch), and division by zero surfaces as `Result::Err(DivByZero)`
//! rather than an embedded error value (see DESIGN.md).

use rust_decimal::Decimal;

use formula_common::address::{ARef, CellRange};
use formula_common::codec;
use formula_common::value::CellValue;

use crate::ast::{DecoderKind, Location, ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::traits::{Clock, SheetAccess, WorkbookAccess};

/// Bundles the host capabilities a single evaluation needs (§6 "Embedding
/// API"). Threaded through recursive `eval` calls and into builtin function
/// bodies so they can recurse, resolve cross-sheet refs, and read the clock
/// without their own plumbing.
pub struct EvalCtx<'a> {
    pub sheet: &'a dyn SheetAccess,
    pub clock: &'a dyn Clock,
    pub workbook: Option<&'a dyn WorkbookAccess>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(sheet: &'a dyn SheetAccess, clock: &'a dyn Clock, workbook: Option<&'a dyn WorkbookAccess>) -> Self {
        EvalCtx { sheet, clock, workbook }
    }

    pub fn eval(&self, expr: &TExpr) -> Result<EvalValue, EvalError> {
        eval(expr, self.sheet, self.clock, self.workbook)
    }

    pub fn resolve_sheet(&self, name: &str) -> Result<&'a dyn SheetAccess, EvalError> {
        let wb = self.workbook.ok_or_else(|| {
            EvalError::failed(format!("cross-sheet '{name}' requires workbook context"))
        })?;
        wb.get(name)
            .map_err(|_| EvalError::failed(format!("sheet '{name}' not found")))
    }

    /// Resolves a `Location` to the sheet that owns it plus its range
    /// intersected with that sheet's used range (§4.8: whole-column/row
    /// references must never be materialized in full).
    pub fn location_bounds(&self, loc: &Location) -> Result<(&'a dyn SheetAccess, CellRange), EvalError> {
        let (sheet, range) = match loc {
            Location::Local(r) => (self.sheet, *r),
            Location::CrossSheet(name, r) => (self.resolve_sheet(name)?, *r),
        };
        // An entirely empty sheet yields the same degenerate single-cell
        // range as a used-but-non-overlapping one (§4.8): callers fold over
        // zero cells rather than failing before the fold begins.
        let degenerate = CellRange {
            start: range.start,
            end: range.start,
            start_anchor: range.start_anchor,
            end_anchor: range.start_anchor,
        };
        let bounded = match sheet.used_range() {
            Some(used) => range.intersect(&used).unwrap_or(degenerate),
            None => degenerate,
        };
        Ok((sheet, bounded))
    }

    /// Same bounding rule as `location_bounds`, for a raw `TExpr` argument
    /// that is expected to be a `RangeRef`/`SheetRange`/single `Ref`. Used by
    /// builtins that need positional cell access (`VLOOKUP`, `INDEX`, ...).
    pub fn range_bounds(&self, expr: &TExpr) -> Result<(&'a dyn SheetAccess, CellRange), EvalError> {
        match expr {
            TExpr::RangeRef { range } => self.location_bounds(&Location::Local(*range)),
            TExpr::SheetRange { sheet, range } => {
                self.location_bounds(&Location::CrossSheet(sheet.clone(), *range))
            }
            TExpr::Ref { addr, .. } => Ok((
                self.sheet,
                CellRange {
                    start: *addr,
                    end: *addr,
                    start_anchor: formula_common::address::Anchor::Relative,
                    end_anchor: formula_common::address::Anchor::Relative,
                },
            )),
            TExpr::SheetRef { sheet, addr, .. } => {
                let s = self.resolve_sheet(sheet)?;
                Ok((
                    s,
                    CellRange {
                        start: *addr,
                        end: *addr,
                        start_anchor: formula_common::address::Anchor::Relative,
                        end_anchor: formula_common::address::Anchor::Relative,
                    },
                ))
            }
            _ => Err(EvalError::failed("expected a range or cell reference argument")),
        }
    }

    /// Materializes a bounded range into a row-major grid of `CellValue`s,
    /// for functions that need positional access (`VLOOKUP`, `INDEX`,
    /// `MATCH`, `SUMPRODUCT`).
    pub fn materialize(&self, expr: &TExpr) -> Result<Vec<Vec<CellValue>>, EvalError> {
        let (sheet, range) = self.range_bounds(expr)?;
        let mut rows = Vec::with_capacity(range.height() as usize);
        for row in range.start.row.0..=range.end.row.0 {
            let mut cols = Vec::with_capacity(range.width() as usize);
            for col in range.start.col.0..=range.end.col.0 {
                cols.push(sheet.get(ARef::new(col, row)).value);
            }
            rows.push(cols);
        }
        Ok(rows)
    }

    pub fn number(&self, expr: &TExpr, fn_name: &str) -> Result<Decimal, EvalError> {
        let v = self.eval(expr)?;
        v.as_number().ok_or_else(|| type_mismatch(fn_name, "number", &v))
    }

    pub fn text(&self, expr: &TExpr) -> Result<String, EvalError> {
        Ok(self.eval(expr)?.as_text())
    }

    pub fn int(&self, expr: &TExpr, fn_name: &str) -> Result<i64, EvalError> {
        let v = self.eval(expr)?;
        match v.as_number() {
            Some(n) if n.fract().is_zero() => n
                .to_string()
                .parse()
                .map_err(|_| EvalError::failed(format!("{fn_name}: integer argument out of range"))),
            Some(_) => Err(EvalError::failed(format!("{fn_name}: expected an integer argument"))),
            None => Err(type_mismatch(fn_name, "number", &v)),
        }
    }

    pub fn boolean(&self, expr: &TExpr) -> Result<bool, EvalError> {
        Ok(self.eval(expr)?.is_truthy())
    }

    pub fn date(&self, expr: &TExpr, fn_name: &str) -> Result<chrono::NaiveDate, EvalError> {
        let v = self.eval(expr)?;
        match v {
            EvalValue::Date(d) => Ok(d),
            EvalValue::DateTime(dt) => Ok(dt.date()),
            EvalValue::Number(n) => crate::excel_date::serial_to_date(n)
                .ok_or_else(|| EvalError::failed(format!("{fn_name}: invalid date serial"))),
            other => Err(type_mismatch(fn_name, "date", &other)),
        }
    }
}

fn type_mismatch(function: &str, expected: &str, actual: &EvalValue) -> EvalError {
    EvalError::TypeMismatch {
        function: function.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

/// `eval(expr, sheet, clock, workbook) -> Result<A, EvalError>` (§6). Total:
/// never panics on a well-formed `TExpr`.
pub fn eval(
    expr: &TExpr,
    sheet: &dyn SheetAccess,
    clock: &dyn Clock,
    workbook: Option<&dyn WorkbookAccess>,
) -> Result<EvalValue, EvalError> {
    match expr {
        TExpr::Lit(v) => Ok(EvalValue::from_cell_value(v)),

        TExpr::Ref { addr, decoder, .. } => decode_ref(sheet.get(*addr).value, *addr, *decoder),

        TExpr::PolyRef { .. } => Err(EvalError::failed(
            "unresolved poly-reference reached the evaluator (contract violation)",
        )),

        TExpr::SheetRef { sheet: name, addr, decoder, .. } => {
            let wb = workbook.ok_or_else(|| {
                EvalError::failed(format!("cross-sheet reference to '{name}' requires workbook context"))
            })?;
            let target = wb
                .get(name)
                .map_err(|_| EvalError::failed(format!("sheet '{name}' not found")))?;
            decode_ref(target.get(*addr).value, *addr, *decoder)
        }

        TExpr::SheetPolyRef { .. } => Err(EvalError::failed(
            "unresolved cross-sheet poly-reference reached the evaluator (contract violation)",
        )),

        TExpr::RangeRef { .. } | TExpr::SheetRange { .. } => Err(EvalError::failed(
            "a range cannot be evaluated directly; it must be consumed by an aggregate or function",
        )),

        TExpr::Add(a, b) => numeric_binop(expr_ctx(sheet, clock, workbook), a, b, "+", |x, y| Ok(x + y)),
        TExpr::Sub(a, b) => numeric_binop(expr_ctx(sheet, clock, workbook), a, b, "-", |x, y| Ok(x - y)),
        TExpr::Mul(a, b) => numeric_binop(expr_ctx(sheet, clock, workbook), a, b, "*", |x, y| Ok(x * y)),
        TExpr::Div(a, b) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            let x = ctx.number(a, "/")?;
            let y = ctx.number(b, "/")?;
            if y.is_zero() {
                #[cfg(feature = "tracing")]
                tracing::debug!(lhs = %crate::print::Printer::print(a, false), "division by zero");
                Err(EvalError::DivByZero {
                    numerator: crate::print::Printer::print(a, false),
                    denominator: crate::print::Printer::print(b, false),
                })
            } else {
                Ok(EvalValue::Number(x / y))
            }
        }

        TExpr::Concat(a, b) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            let x = ctx.text(a)?;
            let y = ctx.text(b)?;
            Ok(EvalValue::Text(format!("{x}{y}")))
        }

        TExpr::And(a, b) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            let left = ctx.boolean(a)?;
            if !left {
                return Ok(EvalValue::Bool(false));
            }
            Ok(EvalValue::Bool(ctx.boolean(b)?))
        }
        TExpr::Or(a, b) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            let left = ctx.boolean(a)?;
            if left {
                return Ok(EvalValue::Bool(true));
            }
            Ok(EvalValue::Bool(ctx.boolean(b)?))
        }
        TExpr::Not(a) => Ok(EvalValue::Bool(!expr_ctx(sheet, clock, workbook).boolean(a)?)),

        TExpr::Eq(a, b) => Ok(EvalValue::Bool(structural_eq(
            &expr_ctx(sheet, clock, workbook).eval(a)?,
            &expr_ctx(sheet, clock, workbook).eval(b)?,
        ))),
        TExpr::Neq(a, b) => Ok(EvalValue::Bool(!structural_eq(
            &expr_ctx(sheet, clock, workbook).eval(a)?,
            &expr_ctx(sheet, clock, workbook).eval(b)?,
        ))),
        TExpr::Lt(a, b) => numeric_compare(expr_ctx(sheet, clock, workbook), a, b, "<", |x, y| x < y),
        TExpr::Lte(a, b) => numeric_compare(expr_ctx(sheet, clock, workbook), a, b, "<=", |x, y| x <= y),
        TExpr::Gt(a, b) => numeric_compare(expr_ctx(sheet, clock, workbook), a, b, ">", |x, y| x > y),
        TExpr::Gte(a, b) => numeric_compare(expr_ctx(sheet, clock, workbook), a, b, ">=", |x, y| x >= y),

        TExpr::ToInt(a) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            let n = ctx.number(a, "ToInt")?;
            if n.fract().is_zero() {
                Ok(EvalValue::Int(n.to_string().parse().map_err(|_| {
                    EvalError::failed("ToInt: value out of i64 range")
                })?))
            } else {
                Err(EvalError::TypeMismatch {
                    function: "ToInt".to_string(),
                    expected: "integer".to_string(),
                    actual: "fractional number".to_string(),
                })
            }
        }
        TExpr::DateToSerial(a) => {
            let d = expr_ctx(sheet, clock, workbook).date(a, "DateToSerial")?;
            Ok(EvalValue::Number(crate::excel_date::date_to_serial(d)))
        }
        TExpr::DateTimeToSerial(a) => {
            let ctx = expr_ctx(sheet, clock, workbook);
            match ctx.eval(a)? {
                EvalValue::DateTime(dt) => Ok(EvalValue::Number(crate::excel_date::datetime_to_serial(dt))),
                EvalValue::Date(d) => Ok(EvalValue::Number(crate::excel_date::date_to_serial(d))),
                other => Err(type_mismatch("DateTimeToSerial", "datetime", &other)),
            }
        }

        TExpr::If { cond, then_branch, else_branch } => {
            let ctx = expr_ctx(sheet, clock, workbook);
            if ctx.boolean(cond)? {
                ctx.eval(then_branch)
            } else {
                ctx.eval(else_branch)
            }
        }

        TExpr::Aggregate { name, location } => {
            crate::aggregate::eval_aggregate(name, location, &expr_ctx(sheet, clock, workbook))
        }

        TExpr::Call { spec, args } => {
            if !spec.arity.accepts(args.len()) {
                return Err(EvalError::failed(format!(
                    "{}: wrong number of arguments ({})",
                    spec.name,
                    args.len()
                )));
            }
            (spec.eval_fn)(args, &expr_ctx(sheet, clock, workbook))
        }
    }
}

fn expr_ctx<'a>(sheet: &'a dyn SheetAccess, clock: &'a dyn Clock, workbook: Option<&'a dyn WorkbookAccess>) -> EvalCtx<'a> {
    EvalCtx::new(sheet, clock, workbook)
}

fn decode_ref(value: CellValue, addr: ARef, decoder: DecoderKind) -> Result<EvalValue, EvalError> {
    let cell = formula_common::value::Cell::new(value);
    match decoder {
        DecoderKind::NumberStrict => codec::decode_number_strict(&cell)
            .map(EvalValue::Number)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::TextStrict => codec::decode_text_strict(&cell)
            .map(EvalValue::Text)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::BoolStrict => codec::decode_bool_strict(&cell)
            .map(EvalValue::Bool)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::DateTimeStrict => codec::decode_datetime_strict(&cell)
            .map(EvalValue::DateTime)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::ResolvedValue => Ok(EvalValue::from_cell_value(&codec::decode_resolved_value(&cell))),
        DecoderKind::AsString => Ok(EvalValue::Text(codec::decode_as_string(&cell))),
        DecoderKind::AsInt => codec::decode_as_int(&cell)
            .map(EvalValue::Int)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::AsDate => codec::decode_as_date(&cell)
            .map(EvalValue::Date)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
        DecoderKind::AsBool => codec::decode_as_bool(&cell)
            .map(EvalValue::Bool)
            .map_err(|cause| EvalError::CodecFailed { address: addr, cause }),
    }
}

fn numeric_binop(
    ctx: EvalCtx<'_>,
    a: &TExpr,
    b: &TExpr,
    op: &str,
    combine: impl Fn(Decimal, Decimal) -> Result<Decimal, EvalError>,
) -> Result<EvalValue, EvalError> {
    let x = ctx.number(a, op)?;
    let y = ctx.number(b, op)?;
    combine(x, y).map(EvalValue::Number)
}

fn numeric_compare(ctx: EvalCtx<'_>, a: &TExpr, b: &TExpr, op: &str, cmp: impl Fn(Decimal, Decimal) -> bool) -> Result<EvalValue, EvalError> {
    let x = ctx.number(a, op)?;
    let y = ctx.number(b, op)?;
    Ok(EvalValue::Bool(cmp(x, y)))
}

/// Structural equality across `EvalValue`, with light numeric-tower
/// widening (`Int`/`Number`/`Bool` compare numerically against each other)
/// so `=1=TRUE` and `=1=1.0` behave as Excel users expect.
pub fn structural_eq(a: &EvalValue, b: &EvalValue) -> bool {
    if let (Some(x), Some(y)) = (numeric_like(a), numeric_like(b)) {
        return x == y;
    }
    match (a, b) {
        (EvalValue::Text(x), EvalValue::Text(y)) => x.eq_ignore_ascii_case(y),
        (EvalValue::Date(x), EvalValue::Date(y)) => x == y,
        (EvalValue::DateTime(x), EvalValue::DateTime(y)) => x == y,
        (EvalValue::Empty, EvalValue::Empty) => true,
        (EvalValue::Error(x), EvalValue::Error(y)) => x == y,
        _ => false,
    }
}

fn numeric_like(v: &EvalValue) -> Option<Decimal> {
    match v {
        EvalValue::Number(_) | EvalValue::Int(_) | EvalValue::Bool(_) => v.as_number(),
        _ => None,
    }
}
