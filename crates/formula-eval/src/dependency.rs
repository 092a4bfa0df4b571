//! Dependency analysis over already-typed formula trees (§4.8).
//!
//! This crate never sees formula text, so the graph is built from whatever
//! `TExpr`s a host has already parsed and resolved — the host is responsible
//! for the "parse every formula in the workbook" step before calling
//! [`DependencyGraph::from_workbook`]. The `(dependencies, dependents)`
//! adjacency-map split and the `Layer`-style topological batching follow
//! the general shape of `engine::scheduler::{Layer, Schedule}`'s DTOs,
//! re-expressed over the typed AST instead of a cell-value DAG.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use formula_common::address::{ARef, CellRange};

use crate::ast::{Location, TExpr};

/// A cell address qualified by the sheet it lives on, so cross-sheet
/// dependencies can be tracked in one flat key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedRef {
    pub sheet: String,
    pub addr: ARef,
}

impl QualifiedRef {
    pub fn new(sheet: impl Into<String>, addr: ARef) -> Self {
        QualifiedRef { sheet: sheet.into(), addr }
    }
}

impl fmt::Display for QualifiedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.addr.to_a1())
    }
}

/// One sheet's worth of already-resolved formulas, keyed by the cell they
/// live in. `bounds`, if given, clamps unbounded ranges the same way
/// `EvalCtx::location_bounds` does; a graph built without it treats every
/// range reference at face value.
#[derive(Debug, Clone, Default)]
pub struct SheetFormulas {
    pub formulas: FxHashMap<ARef, TExpr>,
    pub bounds: Option<CellRange>,
}

impl SheetFormulas {
    pub fn new() -> Self {
        SheetFormulas::default()
    }

    /// Sets the used-range bound every range reference on this sheet gets
    /// clamped to before enumeration (§4.8: whole-column/row references must
    /// never be materialized in full).
    pub fn with_bounds(mut self, bounds: CellRange) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn insert(&mut self, addr: ARef, expr: TExpr) -> &mut Self {
        self.formulas.insert(addr, expr);
        self
    }
}

/// A cycle detected while building or sorting the graph. Carries a closed
/// walk: the first node repeated at the end, as `EvalError::CircularRef`
/// does for the evaluator's own (single-sheet) cycle report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircularRef {
    pub path: Vec<QualifiedRef>,
}

impl fmt::Display for CircularRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.path.iter().map(|q| q.to_string()).collect();
        write!(f, "circular reference: {}", rendered.join(" -> "))
    }
}

impl std::error::Error for CircularRef {}

/// A precedent/dependent graph over a workbook's formulas (§4.8).
///
/// `dependencies[cell]` is every cell `cell`'s formula reads from;
/// `dependents[cell]` is every cell that reads from `cell`. Both default to
/// the empty set for cells outside the formula set (a plain value cell has
/// no dependencies, and a cell nothing reads from has no dependents).
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: FxHashMap<QualifiedRef, FxHashSet<QualifiedRef>>,
    dependents: FxHashMap<QualifiedRef, FxHashSet<QualifiedRef>>,
}

impl DependencyGraph {
    /// Builds a graph from one sheet's formulas, with no cross-sheet edges.
    pub fn from_sheet(sheet_name: &str, formulas: &SheetFormulas) -> Self {
        let mut qualified = FxHashMap::default();
        for (addr, expr) in &formulas.formulas {
            qualified.insert(QualifiedRef::new(sheet_name, *addr), expr);
        }
        let mut bounds = FxHashMap::default();
        if let Some(b) = formulas.bounds {
            bounds.insert(sheet_name.to_string(), b);
        }
        Self::build(&qualified, &bounds)
    }

    /// Builds a graph across every sheet in a workbook, following
    /// sheet-qualified references across sheet boundaries.
    pub fn from_workbook<'a>(sheets: impl IntoIterator<Item = (&'a str, &'a SheetFormulas)>) -> Self {
        let mut qualified = FxHashMap::default();
        let mut bounds = FxHashMap::default();
        for (sheet_name, formulas) in sheets {
            for (addr, expr) in &formulas.formulas {
                qualified.insert(QualifiedRef::new(sheet_name, *addr), expr);
            }
            if let Some(b) = formulas.bounds {
                bounds.insert(sheet_name.to_string(), b);
            }
        }
        Self::build(&qualified, &bounds)
    }

    fn build(qualified: &FxHashMap<QualifiedRef, &TExpr>, bounds: &FxHashMap<String, CellRange>) -> Self {
        let mut dependencies: FxHashMap<QualifiedRef, FxHashSet<QualifiedRef>> = FxHashMap::default();
        let mut dependents: FxHashMap<QualifiedRef, FxHashSet<QualifiedRef>> = FxHashMap::default();

        for (cell, expr) in qualified {
            let mut refs = FxHashSet::default();
            collect_refs(cell.sheet.as_str(), expr, bounds, &mut refs);

            for dep in &refs {
                dependents.entry(dep.clone()).or_default().insert(cell.clone());
            }
            dependencies.insert(cell.clone(), refs);
        }

        DependencyGraph { dependencies, dependents }
    }

    /// The cells `cell`'s formula reads from directly, or the empty set if
    /// `cell` has no formula (or is unknown to the graph).
    pub fn precedents(&self, cell: &QualifiedRef) -> FxHashSet<QualifiedRef> {
        self.dependencies.get(cell).cloned().unwrap_or_default()
    }

    /// The cells that read from `cell` directly.
    pub fn dependents(&self, cell: &QualifiedRef) -> FxHashSet<QualifiedRef> {
        self.dependents.get(cell).cloned().unwrap_or_default()
    }

    /// Every cell `cell` transitively depends on, following precedent edges
    /// to a fixed point (§4.8 "transitive precedents").
    pub fn transitive_precedents(&self, cell: &QualifiedRef) -> FxHashSet<QualifiedRef> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<QualifiedRef> = self.precedents(cell).into_iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.precedents(&next));
            }
        }
        seen
    }

    /// Tarjan's strongly-connected-components algorithm, reporting the first
    /// nontrivial SCC (size > 1, or a single node that depends on itself) as
    /// a cycle. O(V+E).
    pub fn detect_cycles(&self) -> Result<(), CircularRef> {
        struct Tarjan<'g> {
            graph: &'g DependencyGraph,
            index: FxHashMap<QualifiedRef, usize>,
            low_link: FxHashMap<QualifiedRef, usize>,
            on_stack: FxHashSet<QualifiedRef>,
            stack: Vec<QualifiedRef>,
            next_index: usize,
        }

        impl<'g> Tarjan<'g> {
            fn strong_connect(&mut self, node: &QualifiedRef) -> Result<(), CircularRef> {
                self.index.insert(node.clone(), self.next_index);
                self.low_link.insert(node.clone(), self.next_index);
                self.next_index += 1;
                self.stack.push(node.clone());
                self.on_stack.insert(node.clone());

                for succ in self.graph.precedents(node) {
                    if !self.index.contains_key(&succ) {
                        self.strong_connect(&succ)?;
                        let succ_low = self.low_link[&succ];
                        let entry = self.low_link.get_mut(node).unwrap();
                        *entry = (*entry).min(succ_low);
                    } else if self.on_stack.contains(&succ) {
                        let succ_index = self.index[&succ];
                        let entry = self.low_link.get_mut(node).unwrap();
                        *entry = (*entry).min(succ_index);
                    }
                }

                if self.low_link[node] == self.index[node] {
                    let mut component = Vec::new();
                    loop {
                        let w = self.stack.pop().unwrap();
                        self.on_stack.remove(&w);
                        let is_node = w == *node;
                        component.push(w);
                        if is_node {
                            break;
                        }
                    }
                    let self_loop = component.len() == 1 && self.graph.precedents(node).contains(node);
                    if component.len() > 1 || self_loop {
                        let mut path = component;
                        path.reverse();
                        let first = path[0].clone();
                        path.push(first);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(cycle_len = path.len(), "circular reference detected during cycle scan");
                        return Err(CircularRef { path });
                    }
                }
                Ok(())
            }
        }

        let mut tarjan = Tarjan {
            graph: self,
            index: FxHashMap::default(),
            low_link: FxHashMap::default(),
            on_stack: FxHashSet::default(),
            stack: Vec::new(),
            next_index: 0,
        };

        let mut nodes: Vec<QualifiedRef> = self.dependencies.keys().cloned().collect();
        nodes.sort();
        for node in &nodes {
            if !tarjan.index.contains_key(node) {
                tarjan.strong_connect(node)?;
            }
        }
        Ok(())
    }

    /// Kahn's algorithm: a recomputation order where every cell appears
    /// after all the formula cells it depends on (§4.8). Non-formula
    /// precedents (plain values) don't gate anything, since they have no
    /// in-degree of their own. Fails with the same cycle report as
    /// [`DependencyGraph::detect_cycles`] if the graph isn't a DAG.
    pub fn topological_sort(&self) -> Result<Vec<QualifiedRef>, CircularRef> {
        let mut nodes: Vec<QualifiedRef> = self.dependencies.keys().cloned().collect();
        nodes.sort();

        let mut in_degree: FxHashMap<QualifiedRef, usize> =
            nodes.iter().map(|n| (n.clone(), 0)).collect();
        for node in &nodes {
            for dep in self.precedents(node) {
                // Only formula-node precedents gate recomputation order; a
                // plain value has no in-degree, so it never needs to be
                // "sorted" before the formula that reads it.
                if in_degree.contains_key(&dep) {
                    *in_degree.get_mut(node).unwrap() += 1;
                }
            }
        }

        let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<QualifiedRef>> = nodes
            .iter()
            .filter(|n| in_degree[*n] == 0)
            .map(|n| std::cmp::Reverse(n.clone()))
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(std::cmp::Reverse(node)) = ready.pop() {
            order.push(node.clone());
            for dependent in self.dependents(&node) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(std::cmp::Reverse(dependent));
                    }
                }
            }
        }

        if order.len() == nodes.len() {
            Ok(order)
        } else {
            self.detect_cycles()?;
            // Defensive: detect_cycles should always have found the cycle
            // topological_sort tripped over.
            Err(CircularRef { path: vec![] })
        }
    }
}

/// Clamps `range` to `sheet`'s bound, if one was given, the same way
/// `EvalCtx::location_bounds` clamps to a live `used_range()` (§4.8:
/// whole-column/row references must never be materialized in full). A range
/// that doesn't overlap its bound at all collapses to a degenerate
/// single-cell range at its own start, same as the evaluator's empty-sheet
/// fallback.
fn clamp_range(sheet: &str, range: &CellRange, bounds: &FxHashMap<String, CellRange>) -> CellRange {
    match bounds.get(sheet) {
        Some(b) => range.intersect(b).unwrap_or(CellRange {
            start: range.start,
            end: range.start,
            start_anchor: range.start_anchor,
            end_anchor: range.start_anchor,
        }),
        None => *range,
    }
}

/// Walks a typed expression tree collecting every reference it makes,
/// qualified by the sheet the reference lives on (the formula's own sheet
/// for bare refs, or the named sheet for `SheetRef`/`SheetRange`). Range
/// references are clamped to `bounds` before enumeration.
fn collect_refs(
    home_sheet: &str,
    expr: &TExpr,
    bounds: &FxHashMap<String, CellRange>,
    out: &mut FxHashSet<QualifiedRef>,
) {
    match expr {
        TExpr::Ref { addr, .. } | TExpr::PolyRef { addr, .. } => {
            out.insert(QualifiedRef::new(home_sheet, *addr));
        }
        TExpr::SheetRef { sheet, addr, .. } | TExpr::SheetPolyRef { sheet, addr, .. } => {
            out.insert(QualifiedRef::new(sheet.clone(), *addr));
        }
        TExpr::RangeRef { range } => {
            for addr in clamp_range(home_sheet, range, bounds).cells() {
                out.insert(QualifiedRef::new(home_sheet, addr));
            }
        }
        TExpr::SheetRange { sheet, range } => {
            for addr in clamp_range(sheet, range, bounds).cells() {
                out.insert(QualifiedRef::new(sheet.clone(), addr));
            }
        }
        TExpr::Aggregate { location, .. } => match location {
            Location::Local(range) => {
                for addr in clamp_range(home_sheet, range, bounds).cells() {
                    out.insert(QualifiedRef::new(home_sheet, addr));
                }
            }
            Location::CrossSheet(sheet, range) => {
                for addr in clamp_range(sheet, range, bounds).cells() {
                    out.insert(QualifiedRef::new(sheet.clone(), addr));
                }
            }
        },
        other => {
            for child in other.children() {
                collect_refs(home_sheet, child, bounds, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DecoderKind;
    use formula_common::address::Anchor;

    fn cell_ref(sheet: &str, col: u32, row: u32) -> TExpr {
        TExpr::SheetRef {
            sheet: sheet.to_string(),
            addr: ARef::new(col, row),
            anchor: Anchor::Relative,
            decoder: DecoderKind::ResolvedValue,
        }
    }

    fn bare_ref(col: u32, row: u32) -> TExpr {
        TExpr::Ref {
            addr: ARef::new(col, row),
            anchor: Anchor::Relative,
            decoder: DecoderKind::ResolvedValue,
        }
    }

    /// A1 = B1 + 1, B1 = 2: a two-cell chain with one plain-value precedent.
    #[test]
    fn linear_chain_topological_order() {
        let mut formulas = SheetFormulas::new();
        formulas.insert(
            ARef::new(0, 0),
            TExpr::Add(Box::new(bare_ref(1, 0)), Box::new(TExpr::Lit(lit_num(1)))),
        );
        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);

        let order = graph.topological_sort().unwrap();
        // B1 isn't a formula cell, so only A1 appears in the sort.
        assert_eq!(order, vec![QualifiedRef::new("Sheet1", ARef::new(0, 0))]);
    }

    /// A1 depends on B1, B1 depends on A1: a direct two-node cycle.
    #[test]
    fn direct_cycle_is_detected() {
        let mut formulas = SheetFormulas::new();
        formulas.insert(ARef::new(0, 0), bare_ref(1, 0));
        formulas.insert(ARef::new(1, 0), bare_ref(0, 0));
        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);

        assert!(graph.detect_cycles().is_err());
        assert!(graph.topological_sort().is_err());
    }

    /// A1 referencing itself directly.
    #[test]
    fn self_reference_is_a_cycle() {
        let mut formulas = SheetFormulas::new();
        formulas.insert(ARef::new(0, 0), bare_ref(0, 0));
        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);

        let err = graph.detect_cycles().unwrap_err();
        assert_eq!(err.path.len(), 2);
        assert_eq!(err.path[0], err.path[1]);
    }

    /// Cross-sheet precedents are tracked and sorted across the boundary.
    #[test]
    fn cross_sheet_precedents() {
        let mut sheet1 = SheetFormulas::new();
        sheet1.insert(ARef::new(0, 0), cell_ref("Sheet2", 0, 0));
        let mut sheet2 = SheetFormulas::new();
        sheet2.insert(ARef::new(0, 0), TExpr::Lit(lit_num(5)));

        let graph = DependencyGraph::from_workbook([("Sheet1", &sheet1), ("Sheet2", &sheet2)]);
        let order = graph.topological_sort().unwrap();
        let sheet2_a1 = QualifiedRef::new("Sheet2", ARef::new(0, 0));
        let sheet1_a1 = QualifiedRef::new("Sheet1", ARef::new(0, 0));
        let pos2 = order.iter().position(|n| n == &sheet2_a1).unwrap();
        let pos1 = order.iter().position(|n| n == &sheet1_a1).unwrap();
        assert!(pos2 < pos1);

        assert!(graph.precedents(&sheet1_a1).contains(&sheet2_a1));
        assert!(graph.dependents(&sheet2_a1).contains(&sheet1_a1));
    }

    /// A1 -> B1 -> C1: transitive precedents of A1 include both B1 and C1.
    #[test]
    fn transitive_precedents_follow_the_whole_chain() {
        let mut formulas = SheetFormulas::new();
        formulas.insert(ARef::new(0, 0), bare_ref(1, 0));
        formulas.insert(ARef::new(1, 0), bare_ref(2, 0));
        formulas.insert(ARef::new(2, 0), TExpr::Lit(lit_num(3)));
        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);

        let a1 = QualifiedRef::new("Sheet1", ARef::new(0, 0));
        let transitive = graph.transitive_precedents(&a1);
        assert!(transitive.contains(&QualifiedRef::new("Sheet1", ARef::new(1, 0))));
        assert!(transitive.contains(&QualifiedRef::new("Sheet1", ARef::new(2, 0))));
    }

    /// A whole-column range `A:A` must clamp to the sheet's declared bounds
    /// before enumeration, never materializing all ~1M rows.
    #[test]
    fn whole_column_range_clamps_to_declared_bounds() {
        let whole_col_a = CellRange {
            start: ARef::new(0, 0),
            end: ARef::new(0, 1_048_575),
            start_anchor: Anchor::Relative,
            end_anchor: Anchor::Relative,
        };
        let mut formulas = SheetFormulas::new()
            .with_bounds(CellRange {
                start: ARef::new(0, 0),
                end: ARef::new(5, 5),
                start_anchor: Anchor::Relative,
                end_anchor: Anchor::Relative,
            });
        formulas.insert(ARef::new(10, 0), TExpr::Aggregate {
            name: "SUM".to_string(),
            location: Location::Local(whole_col_a),
        });

        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);
        let cell = QualifiedRef::new("Sheet1", ARef::new(10, 0));
        let precedents = graph.precedents(&cell);

        // Clamped to rows 0..=5 of column A, not all 1,048,576 rows.
        assert_eq!(precedents.len(), 6);
        assert!(precedents.contains(&QualifiedRef::new("Sheet1", ARef::new(0, 5))));
        assert!(!precedents.contains(&QualifiedRef::new("Sheet1", ARef::new(0, 6))));
    }

    /// With no declared bounds, ranges are still enumerated at face value
    /// (existing behavior, unaffected by the clamping added for bounded
    /// sheets).
    #[test]
    fn range_without_declared_bounds_is_not_clamped() {
        let small_range = CellRange {
            start: ARef::new(0, 0),
            end: ARef::new(0, 2),
            start_anchor: Anchor::Relative,
            end_anchor: Anchor::Relative,
        };
        let mut formulas = SheetFormulas::new();
        formulas.insert(ARef::new(10, 0), TExpr::RangeRef { range: small_range });

        let graph = DependencyGraph::from_sheet("Sheet1", &formulas);
        let cell = QualifiedRef::new("Sheet1", ARef::new(10, 0));
        assert_eq!(graph.precedents(&cell).len(), 3);
    }

    fn lit_num(n: i64) -> formula_common::value::CellValue {
        formula_common::value::CellValue::Number(rust_decimal::Decimal::from(n))
    }
}
