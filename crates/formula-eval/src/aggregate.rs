//! The aggregator registry (§4.7): named fold objects plugged into the
//! unified `Aggregate` node. Each entry owns `empty`/`combine`/`finalize`
//! over a single shared accumulator shape (sum, count, min, max), since
//! `SUM`/`COUNT`/`MIN`/`MAX`/`AVERAGE` all derive from the same running
//! fold (§8 "state machine for aggregate iteration").
//!
//! Non-numeric cells are skipped rather than erroring, so a fold never
//! needs an Arrow-style columnar backing to stay cheap.

use rust_decimal::Decimal;

use formula_common::codec::decode_numeric_lenient;
use formula_common::value::Cell;

use crate::ast::Location;
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::interpreter::EvalCtx;

#[derive(Debug, Clone, Copy)]
pub struct FoldAcc {
    pub sum: Decimal,
    pub count: i64,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl FoldAcc {
    pub fn empty() -> Self {
        FoldAcc { sum: Decimal::ZERO, count: 0, min: None, max: None }
    }

    /// `Start -> (per cell) decode; on Ok: step(acc, v); on Err: acc
    /// unchanged -> Start` (§4.4's state machine); skipping is not an
    /// error.
    pub fn combine(mut self, v: Decimal) -> Self {
        self.sum += v;
        self.count += 1;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
        self
    }
}

/// One registered aggregator: canonical uppercase name plus the finalizer
/// that turns a completed fold into a result (§4.7).
pub struct AggregatorEntry {
    pub name: &'static str,
    pub finalize: fn(FoldAcc) -> Result<Decimal, EvalError>,
}

const REGISTRY: &[AggregatorEntry] = &[
    AggregatorEntry { name: "SUM", finalize: |acc| Ok(acc.sum) },
    AggregatorEntry { name: "COUNT", finalize: |acc| Ok(Decimal::from(acc.count)) },
    // `MIN`/`MAX` of an empty numeric projection -> 0 (§8 boundary behavior).
    AggregatorEntry { name: "MIN", finalize: |acc| Ok(acc.min.unwrap_or(Decimal::ZERO)) },
    AggregatorEntry { name: "MAX", finalize: |acc| Ok(acc.max.unwrap_or(Decimal::ZERO)) },
    AggregatorEntry {
        name: "AVERAGE",
        finalize: |acc| {
            if acc.count == 0 {
                Err(EvalError::DivByZero {
                    numerator: acc.sum.to_string(),
                    denominator: "0".to_string(),
                })
            } else {
                Ok(acc.sum / Decimal::from(acc.count))
            }
        },
    },
];

pub fn lookup(name: &str) -> Option<&'static AggregatorEntry> {
    let upper = name.to_ascii_uppercase();
    REGISTRY.iter().find(|e| e.name == upper)
}

/// Folds every cell in `location` (bounded to the sheet's used range,
/// §4.8) through the named aggregator, skipping cells that fail to decode
/// numerically (Excel's skip-non-numeric rule, §4.4).
pub fn eval_aggregate(name: &str, location: &Location, ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let entry = lookup(name).ok_or_else(|| EvalError::failed(format!("unknown aggregate function '{name}'")))?;
    let (sheet, range) = ctx.location_bounds(location)?;
    let mut acc = FoldAcc::empty();
    for addr in range.cells() {
        let cell: Cell = sheet.get(addr);
        if let Some(v) = decode_numeric_lenient(&cell) {
            acc = acc.combine(v);
        }
    }
    (entry.finalize)(acc).map(EvalValue::Number)
}
