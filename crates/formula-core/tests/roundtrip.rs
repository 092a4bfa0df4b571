//! Printer round-trip law (§8 property 4): `parse(print(resolve(parse(f))))
//! == resolve(parse(f))`, i.e. printing a resolved tree and re-parsing it
//! yields an equivalent tree. Needs both the parser and the printer, so it
//! lives here rather than in either crate alone (see `formula-eval/src/
//! tests/mod.rs`'s module doc).

use formula_core::parse_formula;
use formula_core::function::DEFAULT_REGISTRY;
use formula_core::print::Printer;

fn roundtrip(formula: &str) {
    let first = parse_formula(formula, &DEFAULT_REGISTRY)
        .unwrap_or_else(|e| panic!("{formula:?} failed to resolve: {e}"));
    let printed = Printer::print(&first, false);
    let second = parse_formula(&printed, &DEFAULT_REGISTRY)
        .unwrap_or_else(|e| panic!("re-parsing printed form {printed:?} of {formula:?} failed: {e}"));
    assert_eq!(
        first, second,
        "roundtrip mismatch for {formula:?}: printed as {printed:?}"
    );
}

#[test]
fn arithmetic_roundtrips() {
    roundtrip("1+2*3");
    roundtrip("(1+2)*3");
    roundtrip("1-2-3");
    roundtrip("1-(2-3)");
    roundtrip("2^10");
}

#[test]
fn references_roundtrip() {
    roundtrip("A1");
    roundtrip("$A$1");
    roundtrip("A$1+$A1");
    roundtrip("Sheet1!A1");
    roundtrip("'My Sheet'!B2");
}

#[test]
fn ranges_roundtrip() {
    roundtrip("SUM(A1:A10)");
    roundtrip("SUM(Sheet2!A1:B5)");
}

#[test]
fn comparisons_and_concat_roundtrip() {
    roundtrip("A1=B1");
    roundtrip("A1<>B1");
    roundtrip("A1&\"x\"&B1");
    roundtrip("A1<=B1");
}

#[test]
fn logical_natives_roundtrip() {
    roundtrip("IF(A1>0,1,-1)");
    roundtrip("AND(A1,B1)");
    roundtrip("OR(A1,B1,C1)");
    roundtrip("NOT(A1)");
}

#[test]
fn function_calls_roundtrip() {
    roundtrip("VLOOKUP(A1,B1:C10,2,FALSE)");
    roundtrip("POWER(A1,2)");
}
