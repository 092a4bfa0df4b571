//! The canonical printer (§4.6): precedence-correct, parse-compatible
//! rendering. `parse(print(e)) = Ok(e)` modulo the canonicalization the
//! parser itself performs (§8 property 4).
//!
//! Sheet-name quoting is reimplemented locally (see `sheet_name_needs_quoting`
//! below) since `formula-eval` does not depend on `formula-parse` (DESIGN.md).

use formula_common::address::CellRange;

use crate::ast::{Location, TExpr};

/// Ascending precedence (§4.6): `Or < And < Compare < Concat < Add/Sub <
/// Mul/Div < Unary`. Function calls and references are atomic (never need
/// parenthesizing).
fn precedence(expr: &TExpr) -> u8 {
    match expr {
        TExpr::Eq(..) | TExpr::Neq(..) | TExpr::Lt(..) | TExpr::Lte(..) | TExpr::Gt(..) | TExpr::Gte(..) => 3,
        TExpr::Concat(..) => 4,
        TExpr::Add(..) | TExpr::Sub(..) => 5,
        TExpr::Mul(..) | TExpr::Div(..) => 6,
        // `And`/`Or`/`Not` always render as the atomic `AND(...)`/`OR(...)`/
        // `NOT(...)` call form (§4.6), never as infix operators, so they
        // never need surrounding parens regardless of context.
        _ => 10,
    }
}

fn sheet_name_needs_quoting(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let bytes = name.as_bytes();
    if bytes[0].is_ascii_digit() {
        return true;
    }
    bytes.iter().any(|&b| {
        matches!(
            b,
            b' ' | b'!' | b'"' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+'
                | b',' | b'-' | b'.' | b'/' | b':' | b';' | b'<' | b'=' | b'>' | b'?' | b'@' | b'['
                | b'\\' | b']' | b'^' | b'`' | b'{' | b'|' | b'}' | b'~'
        )
    })
}

fn render_sheet_prefix(sheet: &str) -> String {
    if sheet_name_needs_quoting(sheet) {
        format!("'{}'!", sheet.replace('\'', "''"))
    } else {
        format!("{sheet}!")
    }
}

fn render_range(range: &CellRange) -> String {
    range.format_anchored()
}

fn render_lit(v: &formula_common::value::CellValue) -> String {
    use formula_common::value::CellValue;
    match v {
        CellValue::Number(n) => n.normalize().to_string(),
        CellValue::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Error(k) => k.to_string(),
        other => other.to_string(),
    }
}

pub struct Printer;

impl Printer {
    /// `Printer.print(expr, includeEquals=true) -> String` (§6).
    pub fn print(expr: &TExpr, include_equals: bool) -> String {
        let body = print_at(expr, 0);
        if include_equals { format!("={body}") } else { body }
    }
}

fn paren_if(needed: bool, s: String) -> String {
    if needed { format!("({s})") } else { s }
}

fn print_binop(op: &str, a: &TExpr, b: &TExpr, my_prec: u8) -> String {
    let left = print_at(a, my_prec);
    // Right operand parenthesizes on equal precedence too: these operators
    // are left-associative, so `a - (b - c)` must keep its parens while
    // `(a - b) - c` doesn't need any. `print_at` applies that parenthesization
    // itself via `min_prec`, so its result is used directly with no second wrap.
    let right = print_at(b, my_prec + 1);
    format!("{left}{op}{right}")
}

fn print_at(expr: &TExpr, min_prec: u8) -> String {
    let prec = precedence(expr);
    let rendered = match expr {
        TExpr::Lit(v) => render_lit(v),

        TExpr::Ref { addr, anchor, .. } | TExpr::PolyRef { addr, anchor } => addr.format_anchored(*anchor),
        TExpr::SheetRef { sheet, addr, anchor, .. } | TExpr::SheetPolyRef { sheet, addr, anchor } => {
            format!("{}{}", render_sheet_prefix(sheet), addr.format_anchored(*anchor))
        }
        TExpr::RangeRef { range } => render_range(range),
        TExpr::SheetRange { sheet, range } => format!("{}{}", render_sheet_prefix(sheet), render_range(range)),

        TExpr::Add(a, b) => print_binop("+", a, b, prec),
        TExpr::Sub(a, b) => print_binop("-", a, b, prec),
        TExpr::Mul(a, b) => print_binop("*", a, b, prec),
        TExpr::Div(a, b) => print_binop("/", a, b, prec),
        TExpr::Concat(a, b) => print_binop("&", a, b, prec),
        TExpr::And(a, b) => format!("AND({},{})", print_at(a, 0), print_at(b, 0)),
        TExpr::Or(a, b) => format!("OR({},{})", print_at(a, 0), print_at(b, 0)),
        TExpr::Not(a) => format!("NOT({})", print_at(a, 0)),
        TExpr::Eq(a, b) => print_binop("=", a, b, prec),
        TExpr::Neq(a, b) => print_binop("<>", a, b, prec),
        TExpr::Lt(a, b) => print_binop("<", a, b, prec),
        TExpr::Lte(a, b) => print_binop("<=", a, b, prec),
        TExpr::Gt(a, b) => print_binop(">", a, b, prec),
        TExpr::Gte(a, b) => print_binop(">=", a, b, prec),

        // Transparent: print only the wrapped operand (§4.6).
        TExpr::ToInt(a) | TExpr::DateToSerial(a) | TExpr::DateTimeToSerial(a) => print_at(a, min_prec),

        TExpr::If { cond, then_branch, else_branch } => {
            format!("IF({},{},{})", print_at(cond, 0), print_at(then_branch, 0), print_at(else_branch, 0))
        }

        TExpr::Aggregate { name, location } => format!("{name}({})", print_location(location)),

        TExpr::Call { spec, args } => {
            let rendered_args: Vec<String> = args.iter().map(|a| print_at(a, 0)).collect();
            let parts = match spec.custom_print {
                Some(f) => f(&rendered_args),
                None => rendered_args,
            };
            format!("{}({})", spec.name, parts.join(","))
        }
    };
    paren_if(prec < min_prec, rendered)
}

fn print_location(loc: &Location) -> String {
    match loc {
        Location::Local(r) => render_range(r),
        Location::CrossSheet(sheet, r) => format!("{}{}", render_sheet_prefix(sheet), render_range(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_common::address::{ARef, Anchor};
    use rust_decimal::Decimal;

    fn num(n: i64) -> TExpr {
        TExpr::Lit(formula_common::value::CellValue::Number(Decimal::from(n)))
    }

    fn aref(col: u32, row: u32, anchor: Anchor) -> TExpr {
        TExpr::Ref { addr: ARef::new(col, row), anchor, decoder: crate::ast::DecoderKind::ResolvedValue }
    }

    #[test]
    fn anchored_ref_prints_with_dollar() {
        let e = aref(1, 0, Anchor::Absolute);
        assert_eq!(Printer::print(&e, true), "=$B$1");
    }

    #[test]
    fn add_sub_left_assoc_no_parens() {
        let e = TExpr::Sub(
            Box::new(TExpr::Sub(Box::new(num(1)), Box::new(num(2)))),
            Box::new(num(3)),
        );
        assert_eq!(Printer::print(&e, false), "1-2-3");
    }

    #[test]
    fn sub_of_sub_on_right_needs_parens() {
        let e = TExpr::Sub(Box::new(num(1)), Box::new(TExpr::Sub(Box::new(num(2)), Box::new(num(3)))));
        assert_eq!(Printer::print(&e, false), "1-(2-3)");
    }

    #[test]
    fn mul_binds_tighter_than_add() {
        let e = TExpr::Add(Box::new(num(1)), Box::new(TExpr::Mul(Box::new(num(2)), Box::new(num(3)))));
        assert_eq!(Printer::print(&e, false), "1+2*3");
    }

    #[test]
    fn right_operand_of_equal_precedence_is_parenthesized_exactly_once() {
        let e = TExpr::Mul(Box::new(num(1)), Box::new(TExpr::Add(Box::new(num(2)), Box::new(num(3)))));
        assert_eq!(Printer::print(&e, false), "1*(2+3)");
    }

    #[test]
    fn nested_and_or_print_without_redundant_parens() {
        // AND(AND(A1,B1),C1), as produced by resolving a 3-arg AND(...).
        let e = TExpr::And(
            Box::new(TExpr::And(Box::new(aref(0, 0, Anchor::Relative)), Box::new(aref(1, 0, Anchor::Relative)))),
            Box::new(aref(2, 0, Anchor::Relative)),
        );
        assert_eq!(Printer::print(&e, false), "AND(AND(A1,B1),C1)");

        let o = TExpr::Or(
            Box::new(TExpr::Or(Box::new(aref(0, 0, Anchor::Relative)), Box::new(aref(1, 0, Anchor::Relative)))),
            Box::new(aref(2, 0, Anchor::Relative)),
        );
        assert_eq!(Printer::print(&o, false), "OR(OR(A1,B1),C1)");
    }

    #[test]
    fn sheet_qualified_ref_quotes_when_needed() {
        let e = TExpr::SheetRef {
            sheet: "My Sheet".to_string(),
            addr: ARef::new(0, 0),
            anchor: Anchor::Relative,
            decoder: crate::ast::DecoderKind::ResolvedValue,
        };
        assert_eq!(Printer::print(&e, false), "'My Sheet'!A1");
    }
}
