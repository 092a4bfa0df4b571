//! Property-based tests for §8 properties 1 (ring laws) and 2
//! (short-circuit). Both exercise `eval` directly against literal-only
//! trees, so no `SheetAccess` fixture beyond the empty sheet is needed.

use proptest::prelude::*;
use rust_decimal::Decimal;

use formula_common::value::CellValue;

use crate::ast::TExpr;
use crate::eval_value::EvalValue;
use crate::interpreter::eval;
use crate::traits::SystemClock;

use super::{empty_sheet, NoWorkbook};

fn lit(n: i64) -> TExpr {
    TExpr::Lit(CellValue::Number(Decimal::from(n)))
}

fn eval_num(expr: &TExpr) -> Decimal {
    let sheet = empty_sheet();
    let clock = SystemClock;
    let wb = NoWorkbook;
    match eval(expr, &sheet, &clock, Some(&wb)).expect("well-typed literal arithmetic never fails") {
        EvalValue::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn add_zero_is_identity(x in -1_000_000i64..1_000_000) {
        let expr = TExpr::Add(Box::new(lit(x)), Box::new(lit(0)));
        prop_assert_eq!(eval_num(&expr), Decimal::from(x));
    }

    #[test]
    fn mul_one_is_identity(x in -1_000_000i64..1_000_000) {
        let expr = TExpr::Mul(Box::new(lit(x)), Box::new(lit(1)));
        prop_assert_eq!(eval_num(&expr), Decimal::from(x));
    }

    #[test]
    fn add_commutes(x in -10_000i64..10_000, y in -10_000i64..10_000) {
        let lhs = TExpr::Add(Box::new(lit(x)), Box::new(lit(y)));
        let rhs = TExpr::Add(Box::new(lit(y)), Box::new(lit(x)));
        prop_assert_eq!(eval_num(&lhs), eval_num(&rhs));
    }

    #[test]
    fn mul_commutes(x in -10_000i64..10_000, y in -10_000i64..10_000) {
        let lhs = TExpr::Mul(Box::new(lit(x)), Box::new(lit(y)));
        let rhs = TExpr::Mul(Box::new(lit(y)), Box::new(lit(x)));
        prop_assert_eq!(eval_num(&lhs), eval_num(&rhs));
    }

    #[test]
    fn mul_distributes_over_add(x in -500i64..500, y in -500i64..500, z in -500i64..500) {
        let lhs = TExpr::Mul(Box::new(lit(x)), Box::new(TExpr::Add(Box::new(lit(y)), Box::new(lit(z)))));
        let rhs = TExpr::Add(
            Box::new(TExpr::Mul(Box::new(lit(x)), Box::new(lit(y)))),
            Box::new(TExpr::Mul(Box::new(lit(x)), Box::new(lit(z)))),
        );
        prop_assert_eq!(eval_num(&lhs), eval_num(&rhs));
    }
}

/// Division by zero on the un-taken branch must never surface: `And`/`Or`
/// only evaluate their second operand when the first doesn't already
/// settle the result.
#[test]
fn and_short_circuits_on_false() {
    let poisoned = TExpr::Div(Box::new(lit(1)), Box::new(lit(0)));
    let expr = TExpr::And(Box::new(TExpr::Lit(CellValue::Bool(false))), Box::new(poisoned));
    let sheet = empty_sheet();
    let clock = SystemClock;
    let wb = NoWorkbook;
    let result = eval(&expr, &sheet, &clock, Some(&wb))
        .expect("short-circuit must not evaluate the poisoned branch");
    assert_eq!(result, EvalValue::Bool(false));
}

#[test]
fn or_short_circuits_on_true() {
    let poisoned = TExpr::Div(Box::new(lit(1)), Box::new(lit(0)));
    let expr = TExpr::Or(Box::new(TExpr::Lit(CellValue::Bool(true))), Box::new(poisoned));
    let sheet = empty_sheet();
    let clock = SystemClock;
    let wb = NoWorkbook;
    let result = eval(&expr, &sheet, &clock, Some(&wb))
        .expect("short-circuit must not evaluate the poisoned branch");
    assert_eq!(result, EvalValue::Bool(true));
}

#[test]
fn and_still_evaluates_second_branch_when_first_is_true() {
    let expr = TExpr::And(
        Box::new(TExpr::Lit(CellValue::Bool(true))),
        Box::new(TExpr::Lit(CellValue::Bool(false))),
    );
    let sheet = empty_sheet();
    let clock = SystemClock;
    let wb = NoWorkbook;
    let result = eval(&expr, &sheet, &clock, Some(&wb)).expect("both operands are well-typed");
    assert_eq!(result, EvalValue::Bool(false));
}
