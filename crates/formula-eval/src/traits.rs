//! Capabilities the evaluator needs from its host (§6 Embedding API).
//!
//! This core only ever needs cell-by-cell lookup plus a used-range bound,
//! not a columnar `Range`/`Table` hierarchy, because ranges are just `ARef`
//! sets intersected with the used range (§4.8), not a materialized column
//! store.

use chrono::{NaiveDate, NaiveDateTime};
use formula_common::address::{ARef, CellRange};
use formula_common::value::Cell;

/// Read-only access to one sheet's cells.
pub trait SheetAccess {
    /// Returns an `Empty` cell if `addr` has never been written.
    fn get(&self, addr: ARef) -> Cell;

    /// The tightest bounding box of non-empty cells, or `None` if the sheet
    /// is entirely empty.
    fn used_range(&self) -> Option<CellRange>;
}

/// Error resolving a sheet by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetNotFound(pub String);

impl std::fmt::Display for SheetNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sheet '{}' not found", self.0)
    }
}

impl std::error::Error for SheetNotFound {}

/// Read-only access to a workbook's sheets, for cross-sheet references.
pub trait WorkbookAccess {
    fn get(&self, sheet_name: &str) -> Result<&dyn SheetAccess, SheetNotFound>;
}

/// Abstracts `today()`/`now()` so the evaluator stays pure and testable.
pub trait Clock {
    fn today(&self) -> NaiveDate;
    fn now(&self) -> NaiveDateTime;
}

/// The system wall clock. Default per §4.4's `Clock` contract.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A fixed clock for deterministic tests and snapshot recomputation.
pub struct FixedClock {
    pub now: NaiveDateTime,
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.now.date()
    }

    fn now(&self) -> NaiveDateTime {
        self.now
    }
}
