//! The reference shifter (§4.5): anchor-aware translation of every
//! reference inside an AST, used to implement formula "dragging".
//!
//! Each endpoint shifts according to its own anchor rather than the range
//! as a whole, over the plain `ARef`/`Anchor` pair this crate uses
//! (DESIGN.md).

use formula_common::address::CellRange;

use crate::ast::{Location, TExpr};

/// Shifts every reference in `expr` by `(dc, dr)`. Identity when both
/// deltas are zero; otherwise rebuilds the tree bottom-up, since `TExpr` is
/// immutable after construction (§3 Invariant 5).
///
/// Laws (§8): `shift(e, 0, 0) = e`; `shift(shift(e, a, b), c, d) = shift(e,
/// a+c, b+d)`; any `Absolute`-anchored `Ref` is fixed in place.
pub fn shift(expr: &TExpr, dc: i64, dr: i64) -> TExpr {
    if dc == 0 && dr == 0 {
        return expr.clone();
    }
    shift_rec(expr, dc, dr)
}

fn shift_range(range: &CellRange, dc: i64, dr: i64) -> CellRange {
    // Each endpoint shifts per its own anchor, so `$A$1:B10` keeps the
    // start pinned while the end drags (§4.5).
    let start = range.start.shifted(range.start_anchor, dc, dr);
    let end = range.end.shifted(range.end_anchor, dc, dr);
    CellRange {
        start,
        end,
        start_anchor: range.start_anchor,
        end_anchor: range.end_anchor,
    }
}

fn shift_location(loc: &Location, dc: i64, dr: i64) -> Location {
    match loc {
        Location::Local(r) => Location::Local(shift_range(r, dc, dr)),
        Location::CrossSheet(sheet, r) => Location::CrossSheet(sheet.clone(), shift_range(r, dc, dr)),
    }
}

fn shift_rec(expr: &TExpr, dc: i64, dr: i64) -> TExpr {
    match expr {
        TExpr::Lit(v) => TExpr::Lit(v.clone()),

        TExpr::Ref { addr, anchor, decoder } => TExpr::Ref {
            addr: addr.shifted(*anchor, dc, dr),
            anchor: *anchor,
            decoder: *decoder,
        },
        TExpr::PolyRef { addr, anchor } => TExpr::PolyRef {
            addr: addr.shifted(*anchor, dc, dr),
            anchor: *anchor,
        },
        TExpr::SheetRef { sheet, addr, anchor, decoder } => TExpr::SheetRef {
            sheet: sheet.clone(),
            addr: addr.shifted(*anchor, dc, dr),
            anchor: *anchor,
            decoder: *decoder,
        },
        TExpr::SheetPolyRef { sheet, addr, anchor } => TExpr::SheetPolyRef {
            sheet: sheet.clone(),
            addr: addr.shifted(*anchor, dc, dr),
            anchor: *anchor,
        },
        TExpr::RangeRef { range } => TExpr::RangeRef { range: shift_range(range, dc, dr) },
        TExpr::SheetRange { sheet, range } => TExpr::SheetRange {
            sheet: sheet.clone(),
            range: shift_range(range, dc, dr),
        },

        TExpr::Add(a, b) => TExpr::Add(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Sub(a, b) => TExpr::Sub(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Mul(a, b) => TExpr::Mul(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Div(a, b) => TExpr::Div(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Concat(a, b) => TExpr::Concat(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::And(a, b) => TExpr::And(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Or(a, b) => TExpr::Or(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Not(a) => TExpr::Not(Box::new(shift_rec(a, dc, dr))),
        TExpr::Eq(a, b) => TExpr::Eq(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Neq(a, b) => TExpr::Neq(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Lt(a, b) => TExpr::Lt(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Lte(a, b) => TExpr::Lte(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Gt(a, b) => TExpr::Gt(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),
        TExpr::Gte(a, b) => TExpr::Gte(Box::new(shift_rec(a, dc, dr)), Box::new(shift_rec(b, dc, dr))),

        TExpr::ToInt(a) => TExpr::ToInt(Box::new(shift_rec(a, dc, dr))),
        TExpr::DateToSerial(a) => TExpr::DateToSerial(Box::new(shift_rec(a, dc, dr))),
        TExpr::DateTimeToSerial(a) => TExpr::DateTimeToSerial(Box::new(shift_rec(a, dc, dr))),

        TExpr::If { cond, then_branch, else_branch } => TExpr::If {
            cond: Box::new(shift_rec(cond, dc, dr)),
            then_branch: Box::new(shift_rec(then_branch, dc, dr)),
            else_branch: Box::new(shift_rec(else_branch, dc, dr)),
        },

        TExpr::Aggregate { name, location } => TExpr::Aggregate {
            name: name.clone(),
            location: shift_location(location, dc, dr),
        },

        TExpr::Call { spec, args } => TExpr::Call {
            spec: spec.clone(),
            args: args.iter().map(|a| shift_rec(a, dc, dr)).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_common::address::{ARef, Anchor};
    use std::sync::Arc;

    fn simple_ref(col: u32, row: u32, anchor: Anchor) -> TExpr {
        TExpr::Ref {
            addr: ARef::new(col, row),
            anchor,
            decoder: crate::ast::DecoderKind::ResolvedValue,
        }
    }

    #[test]
    fn identity_when_no_delta() {
        let e = simple_ref(0, 0, Anchor::Relative);
        assert_eq!(shift(&e, 0, 0), e);
    }

    #[test]
    fn relative_ref_shifts() {
        let e = simple_ref(0, 0, Anchor::Relative);
        let shifted = shift(&e, 0, 1);
        assert_eq!(shifted, simple_ref(0, 1, Anchor::Relative));
    }

    #[test]
    fn absolute_ref_is_fixed() {
        let e = TExpr::Mul(
            Box::new(simple_ref(0, 0, Anchor::Relative)),
            Box::new(simple_ref(1, 0, Anchor::Absolute)),
        );
        let shifted = shift(&e, 0, 1);
        match shifted {
            TExpr::Mul(a, b) => {
                assert_eq!(*a, simple_ref(0, 1, Anchor::Relative));
                assert_eq!(*b, simple_ref(1, 0, Anchor::Absolute));
            }
            _ => panic!("expected Mul"),
        }
    }

    #[test]
    fn composition_law() {
        let e = simple_ref(2, 2, Anchor::Relative);
        let once = shift(&shift(&e, 1, 1), 2, 3);
        let combined = shift(&e, 3, 4);
        assert_eq!(once, combined);
    }

    #[test]
    fn call_args_shift_via_map() {
        let spec = Arc::new(crate::function::FunctionSpec {
            name: "TESTFN",
            arity: crate::function::Arity::Exact(1),
            arg_spec: crate::function::ArgSpec::new(vec![crate::function::ArgKind::Any]),
            return_type: crate::ast::ResultType::Any,
            flags: crate::function::FunctionFlags::default(),
            custom_print: None,
            eval_fn: |_, _| unimplemented!(),
        });
        let e = TExpr::Call {
            spec,
            args: vec![simple_ref(0, 0, Anchor::Relative)],
        };
        let shifted = shift(&e, 1, 0);
        match shifted {
            TExpr::Call { args, .. } => assert_eq!(args[0], simple_ref(1, 0, Anchor::Relative)),
            _ => panic!("expected Call"),
        }
    }
}
