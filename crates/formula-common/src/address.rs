//! Addressing primitives: columns, rows, cell references, and ranges.
//!
//! `Column`/`Row` are zero-based indices; `ARef` pairs them. A1 rendering is
//! one-based for rows and base-26 (no zero digit) for columns, matching
//! Excel's own convention.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Zero-based column index. `A` = 0, `Z` = 25, `AA` = 26, ...
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column(pub u32);

/// Zero-based row index; rendered one-based in A1 notation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Row(pub u32);

impl Column {
    /// Base-26 letters with no zero digit: `A, B, ..., Z, AA, AB, ...`.
    pub fn to_letters(self) -> String {
        let mut col = self.0;
        let mut buf = Vec::new();
        loop {
            let rem = (col % 26) as u8;
            buf.push(b'A' + rem);
            col /= 26;
            if col == 0 {
                break;
            }
            col -= 1;
        }
        buf.reverse();
        String::from_utf8(buf).expect("only ASCII A-Z")
    }

    /// Parses column letters (case-insensitive) back into a zero-based index.
    pub fn from_letters(s: &str) -> Option<Column> {
        if s.is_empty() {
            return None;
        }
        let mut col: u32 = 0;
        let bytes = s.as_bytes();
        for (idx, &ch) in bytes.iter().enumerate() {
            let upper = ch.to_ascii_uppercase();
            if !upper.is_ascii_uppercase() {
                return None;
            }
            let val = (upper - b'A') as u32;
            col = col.checked_mul(26)?;
            col = col.checked_add(val)?;
            if idx != bytes.len() - 1 {
                col = col.checked_add(1)?;
            }
        }
        Some(Column(col))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_letters())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 + 1)
    }
}

/// Anchoring mode of a single reference endpoint.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Anchor {
    Relative,
    AbsCol,
    AbsRow,
    Absolute,
}

impl Anchor {
    pub fn is_col_absolute(self) -> bool {
        matches!(self, Anchor::AbsCol | Anchor::Absolute)
    }

    pub fn is_row_absolute(self) -> bool {
        matches!(self, Anchor::AbsRow | Anchor::Absolute)
    }

    pub fn from_flags(col_abs: bool, row_abs: bool) -> Self {
        match (col_abs, row_abs) {
            (true, true) => Anchor::Absolute,
            (true, false) => Anchor::AbsCol,
            (false, true) => Anchor::AbsRow,
            (false, false) => Anchor::Relative,
        }
    }
}

/// A single cell address, column-major pair.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ARef {
    pub col: Column,
    pub row: Row,
}

impl ARef {
    pub fn new(col: u32, row: u32) -> Self {
        ARef {
            col: Column(col),
            row: Row(row),
        }
    }

    /// `<col-letters><row-number>`, unanchored.
    pub fn to_a1(self) -> String {
        format!("{}{}", self.col, self.row)
    }

    /// Renders with `$` prepended per anchor flags.
    pub fn format_anchored(self, anchor: Anchor) -> String {
        let mut out = String::new();
        if anchor.is_col_absolute() {
            out.push('$');
        }
        out.push_str(&self.col.to_string());
        if anchor.is_row_absolute() {
            out.push('$');
        }
        out.push_str(&self.row.to_string());
        out
    }

    /// Shifts this address by `(dc, dr)`, honoring `anchor`; columns/rows
    /// clamp at zero rather than going negative.
    pub fn shifted(self, anchor: Anchor, dc: i64, dr: i64) -> ARef {
        let col = if anchor.is_col_absolute() {
            self.col.0
        } else {
            (self.col.0 as i64 + dc).max(0) as u32
        };
        let row = if anchor.is_row_absolute() {
            self.row.0
        } else {
            (self.row.0 as i64 + dr).max(0) as u32
        };
        ARef::new(col, row)
    }
}

/// Parses a bare A1 cell reference (no sheet qualification, no `$`).
/// Returns `(ARef, col_abs, row_abs)`.
pub fn parse_a1_cell(s: &str) -> Option<(ARef, bool, bool)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let col_abs = bytes.get(i) == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == col_start {
        return None;
    }
    let col = Column::from_letters(&s[col_start..i])?;
    let row_abs = bytes.get(i) == Some(&b'$');
    if row_abs {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == row_start || i != bytes.len() {
        return None;
    }
    let row_1based: u32 = s[row_start..i].parse().ok()?;
    if row_1based == 0 {
        return None;
    }
    Some((ARef::new(col.0, row_1based - 1), col_abs, row_abs))
}

/// Rectangular range with independent per-endpoint anchors.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: ARef,
    pub end: ARef,
    pub start_anchor: Anchor,
    pub end_anchor: Anchor,
}

impl CellRange {
    /// Canonicalizes so `start <= end` componentwise, swapping per-axis
    /// anchors along with the coordinates they describe.
    pub fn from_corners(a: ARef, a_anchor: Anchor, b: ARef, b_anchor: Anchor) -> Self {
        let (start_col, start_col_abs, end_col, end_col_abs) = if a.col.0 <= b.col.0 {
            (a.col, a_anchor.is_col_absolute(), b.col, b_anchor.is_col_absolute())
        } else {
            (b.col, b_anchor.is_col_absolute(), a.col, a_anchor.is_col_absolute())
        };
        let (start_row, start_row_abs, end_row, end_row_abs) = if a.row.0 <= b.row.0 {
            (a.row, a_anchor.is_row_absolute(), b.row, b_anchor.is_row_absolute())
        } else {
            (b.row, b_anchor.is_row_absolute(), a.row, a_anchor.is_row_absolute())
        };
        CellRange {
            start: ARef {
                col: start_col,
                row: start_row,
            },
            end: ARef {
                col: end_col,
                row: end_row,
            },
            start_anchor: Anchor::from_flags(start_col_abs, start_row_abs),
            end_anchor: Anchor::from_flags(end_col_abs, end_row_abs),
        }
    }

    pub fn width(&self) -> u32 {
        self.end.col.0 - self.start.col.0 + 1
    }

    pub fn height(&self) -> u32 {
        self.end.row.0 - self.start.row.0 + 1
    }

    /// Row-major enumeration of every address in the range.
    pub fn cells(&self) -> impl Iterator<Item = ARef> + '_ {
        let start = self.start;
        let end = self.end;
        (start.row.0..=end.row.0)
            .flat_map(move |row| (start.col.0..=end.col.0).map(move |col| ARef::new(col, row)))
    }

    /// Clamped overlap of two ranges, or `None` if they don't intersect.
    /// The result keeps `self`'s anchors.
    pub fn intersect(&self, other: &CellRange) -> Option<CellRange> {
        let start_col = self.start.col.0.max(other.start.col.0);
        let start_row = self.start.row.0.max(other.start.row.0);
        let end_col = self.end.col.0.min(other.end.col.0);
        let end_row = self.end.row.0.min(other.end.row.0);
        if start_col > end_col || start_row > end_row {
            return None;
        }
        Some(CellRange {
            start: ARef::new(start_col, start_row),
            end: ARef::new(end_col, end_row),
            start_anchor: self.start_anchor,
            end_anchor: self.end_anchor,
        })
    }

    pub fn format_anchored(&self) -> String {
        format!(
            "{}:{}",
            self.start.format_anchored(self.start_anchor),
            self.end.format_anchored(self.end_anchor)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letter_roundtrip() {
        assert_eq!(Column(0).to_letters(), "A");
        assert_eq!(Column(25).to_letters(), "Z");
        assert_eq!(Column(26).to_letters(), "AA");
        assert_eq!(Column::from_letters("AA"), Some(Column(26)));
        assert_eq!(Column::from_letters("a1"), None);
    }

    #[test]
    fn a1_formatting_and_anchors() {
        let r = ARef::new(1, 0); // B1
        assert_eq!(r.to_a1(), "B1");
        assert_eq!(r.format_anchored(Anchor::Absolute), "$B$1");
        assert_eq!(r.format_anchored(Anchor::AbsCol), "$B1");
        assert_eq!(r.format_anchored(Anchor::AbsRow), "B$1");
    }

    #[test]
    fn parse_roundtrips_plain_and_anchored() {
        let (aref, col_abs, row_abs) = parse_a1_cell("$B$3").unwrap();
        assert_eq!(aref, ARef::new(1, 2));
        assert!(col_abs && row_abs);
        let (aref, col_abs, row_abs) = parse_a1_cell("AA10").unwrap();
        assert_eq!(aref, ARef::new(26, 9));
        assert!(!col_abs && !row_abs);
    }

    #[test]
    fn shift_respects_anchor() {
        let r = ARef::new(1, 0);
        let shifted = r.shifted(Anchor::AbsCol, 5, 5);
        assert_eq!(shifted, ARef::new(1, 5));
        let shifted = r.shifted(Anchor::Relative, 5, 5);
        assert_eq!(shifted, ARef::new(6, 5));
        let shifted = r.shifted(Anchor::Relative, -10, -10);
        assert_eq!(shifted, ARef::new(0, 0));
    }

    #[test]
    fn range_intersect_clamps() {
        let a = CellRange::from_corners(
            ARef::new(0, 0),
            Anchor::Relative,
            ARef::new(10, 10),
            Anchor::Relative,
        );
        let b = CellRange::from_corners(
            ARef::new(5, 5),
            Anchor::Relative,
            ARef::new(20, 20),
            Anchor::Relative,
        );
        let overlap = a.intersect(&b).unwrap();
        assert_eq!(overlap.start, ARef::new(5, 5));
        assert_eq!(overlap.end, ARef::new(10, 10));

        let c = CellRange::from_corners(
            ARef::new(100, 100),
            Anchor::Relative,
            ARef::new(200, 200),
            Anchor::Relative,
        );
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn range_dimensions() {
        let r = CellRange::from_corners(
            ARef::new(0, 0),
            Anchor::Relative,
            ARef::new(2, 4),
            Anchor::Relative,
        );
        assert_eq!(r.width(), 3);
        assert_eq!(r.height(), 5);
        assert_eq!(r.cells().count(), 15);
    }
}
