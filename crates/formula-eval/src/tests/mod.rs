//! Larger, cross-module test suites that don't fit naturally in a single
//! source file's inline `#[cfg(test)]` block (§8 "Testable Properties").
//!
//! The algebraic laws (ring laws, short-circuit) live here since they need
//! a full `eval` call against a host sheet. The shifter laws already have
//! inline tests in `shift.rs`; the printer round-trip law needs the parser
//! and lives in `formula-core`'s test suite instead.

mod laws;

use std::collections::HashMap;

use formula_common::address::{ARef, CellRange};
use formula_common::value::Cell;

use crate::traits::{SheetAccess, SheetNotFound, WorkbookAccess};

pub(crate) struct MapSheet {
    pub cells: HashMap<ARef, Cell>,
    pub used: Option<CellRange>,
}

impl SheetAccess for MapSheet {
    fn get(&self, addr: ARef) -> Cell {
        self.cells.get(&addr).cloned().unwrap_or_else(Cell::empty)
    }

    fn used_range(&self) -> Option<CellRange> {
        self.used
    }
}

pub(crate) fn empty_sheet() -> MapSheet {
    MapSheet { cells: HashMap::new(), used: None }
}

pub(crate) struct NoWorkbook;

impl WorkbookAccess for NoWorkbook {
    fn get(&self, sheet_name: &str) -> Result<&dyn SheetAccess, SheetNotFound> {
        Err(SheetNotFound(sheet_name.to_string()))
    }
}
