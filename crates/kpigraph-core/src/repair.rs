//! Repair strategies: pure `table × probe → Option<Repair>` heuristics.
//!
//! ```text
//!   probe (row, col, extracted, labels)
//!        │
//!        ▼
//!   RepairChain ──► strategy 1 ──► None
//!                   strategy 2 ──► Some(Repair) ──► first hit wins
//! ```
//!
//! The validator owns one chain per situation (`RepairPlan`) and decides
//! whether a hit is adopted (index shifts) or only rendered as a fix
//! instruction (scans).

use crate::cell::parse_cell;
use crate::table::SourceTable;
use crate::validator::ValidatorConfig;
use crate::verdict::Repair;

/// What a strategy gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct RepairProbe<'a> {
    pub row: usize,
    pub col: usize,
    pub extracted: Option<f64>,
    pub row_name: Option<&'a str>,
    pub col_name: Option<&'a str>,
    /// Relative difference at the claimed cell, when both sides parsed.
    pub relative_diff: Option<f64>,
}

pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        config: &ValidatorConfig,
    ) -> Option<Repair>;
}

fn repair(strategy: &dyn RepairStrategy, row: usize, col: usize) -> Repair {
    Repair {
        strategy: strategy.name().to_string(),
        row_index: row,
        col_index: col,
        source_value: None,
        row_name: None,
        col_name: None,
    }
}

fn same_label(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn matches_value(table: &SourceTable, row: usize, col: usize, target: f64, tol: f64) -> Option<f64> {
    let v = parse_cell(table.cell(row, col)?)?;
    ((v - target).abs() <= tol).then_some(v)
}

// ============================================================================
// Index shifts (adopted by the validator)
// ============================================================================

/// Claim points at the row-label column: move one column right when that
/// cell parses and its header is the claimed `col_name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelColumnShift;

impl RepairStrategy for LabelColumnShift {
    fn name(&self) -> &'static str {
        "label_column_shift"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        _config: &ValidatorConfig,
    ) -> Option<Repair> {
        if probe.col != 0 || table.cell(probe.row, 0).and_then(parse_cell).is_some() {
            return None;
        }
        let next = probe.col + 1;
        let value = parse_cell(table.cell(probe.row, next)?)?;
        let header = table.column_label(next)?;
        if probe.col_name?.trim() != header.trim() {
            return None;
        }
        let mut r = repair(self, probe.row, next);
        r.source_value = Some(value);
        r.col_name = Some(header.to_string());
        Some(r)
    }
}

/// Off-by-one column: the cell to the right is exact, or much closer than
/// the claimed cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextColumnShift;

impl RepairStrategy for NextColumnShift {
    fn name(&self) -> &'static str {
        "next_column_shift"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        config: &ValidatorConfig,
    ) -> Option<Repair> {
        let extracted = probe.extracted?;
        let next = probe.col + 1;
        let alt = parse_cell(table.cell(probe.row, next)?)?;
        let diff = (alt - extracted).abs();
        let rel = config.relative_diff(alt, extracted);
        let original = probe.relative_diff.unwrap_or(f64::INFINITY);
        let closer = rel < config.small_relative && rel < config.shift_improvement_ratio * original;
        if diff > config.exact_tolerance && !closer {
            return None;
        }
        let mut r = repair(self, probe.row, next);
        r.source_value = Some(alt);
        r.col_name = table.column_label(next).map(str::to_string);
        Some(r)
    }
}

// ============================================================================
// Scans (rendered as fix instructions)
// ============================================================================

/// Find the row whose stub label matches the claimed `row_name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowLabelScan;

impl RepairStrategy for RowLabelScan {
    fn name(&self) -> &'static str {
        "row_label_scan"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        _config: &ValidatorConfig,
    ) -> Option<Repair> {
        let wanted = probe.row_name?;
        let (row, label) = table
            .stub_col
            .iter()
            .enumerate()
            .find(|(_, label)| same_label(label, wanted))?;
        let mut r = repair(self, row, probe.col);
        r.row_name = Some(label.clone());
        Some(r)
    }
}

/// Find the column whose merged header matches the claimed `col_name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderScan;

impl RepairStrategy for HeaderScan {
    fn name(&self) -> &'static str {
        "header_scan"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        _config: &ValidatorConfig,
    ) -> Option<Repair> {
        let wanted = probe.col_name?;
        let (col, header) = table
            .merged_headers
            .iter()
            .enumerate()
            .find(|(_, header)| same_label(header, wanted))?;
        let mut r = repair(self, probe.row, col);
        r.col_name = Some(header.clone());
        Some(r)
    }
}

const ORTHOGONAL: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

const MOORE: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

fn scan_neighbours(
    strategy: &dyn RepairStrategy,
    offsets: &[(i64, i64)],
    table: &SourceTable,
    probe: &RepairProbe<'_>,
    config: &ValidatorConfig,
) -> Option<Repair> {
    let target = probe.extracted?;
    offsets.iter().find_map(|(dr, dc)| {
        let row = usize::try_from(probe.row as i64 + dr).ok()?;
        let col = usize::try_from(probe.col as i64 + dc).ok()?;
        let value = matches_value(table, row, col, target, config.exact_tolerance)?;
        let mut r = repair(strategy, row, col);
        r.source_value = Some(value);
        r.row_name = table.row_label(row).map(str::to_string);
        r.col_name = table.column_label(col).map(str::to_string);
        Some(r)
    })
}

/// Look one step up, down, left and right for the extracted value.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrthogonalNeighbourScan;

impl RepairStrategy for OrthogonalNeighbourScan {
    fn name(&self) -> &'static str {
        "orthogonal_neighbour_scan"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        config: &ValidatorConfig,
    ) -> Option<Repair> {
        scan_neighbours(self, &ORTHOGONAL, table, probe, config)
    }
}

/// Look at all eight surrounding cells for the extracted value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MooreNeighbourScan;

impl RepairStrategy for MooreNeighbourScan {
    fn name(&self) -> &'static str {
        "moore_neighbour_scan"
    }

    fn propose(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        config: &ValidatorConfig,
    ) -> Option<Repair> {
        scan_neighbours(self, &MOORE, table, probe, config)
    }
}

// ============================================================================
// Chains
// ============================================================================

/// Ordered strategies; the first proposal wins.
#[derive(Default)]
pub struct RepairChain {
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl RepairChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(strategy: impl RepairStrategy + 'static) -> Self {
        Self::new().then(strategy)
    }

    pub fn then(mut self, strategy: impl RepairStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn first(
        &self,
        table: &SourceTable,
        probe: &RepairProbe<'_>,
        config: &ValidatorConfig,
    ) -> Option<Repair> {
        self.strategies
            .iter()
            .find_map(|s| s.propose(table, probe, config))
    }
}

impl std::fmt::Debug for RepairChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Which chain the validator consults in each situation.
#[derive(Debug)]
pub struct RepairPlan {
    /// Claimed cell is the label column and does not parse. Adopted.
    pub label_column: RepairChain,
    /// Large value difference. Adopted.
    pub value_shift: RepairChain,
    /// Row label mismatch. Suggested.
    pub row_name: RepairChain,
    /// Column header mismatch. Suggested.
    pub column_name: RepairChain,
    /// Moderate value difference. Suggested.
    pub moderate_value: RepairChain,
    /// Large value difference with no adoptable shift. Suggested.
    pub large_value: RepairChain,
}

impl Default for RepairPlan {
    fn default() -> Self {
        Self {
            label_column: RepairChain::of(LabelColumnShift),
            value_shift: RepairChain::of(NextColumnShift),
            row_name: RepairChain::of(RowLabelScan),
            column_name: RepairChain::of(HeaderScan),
            moderate_value: RepairChain::of(OrthogonalNeighbourScan),
            large_value: RepairChain::of(MooreNeighbourScan),
        }
    }
}
