//! Cell-index validation: does the claimed cell actually hold the claimed value?
//!
//! ```text
//!   identity ─► indices ─► bounds ─► row label ─► column label
//!                                                      │
//!                          compare ◄─ resolve cell ◄───┘
//!                          (shift retry, neighbour scans)
//! ```
//!
//! Steps only ever append errors and fix instructions. Once a step has marked
//! the verdict invalid its confidence is pinned: later steps add detail but
//! neither lower the confidence nor make it valid again.

use crate::cell::parse_cell;
use crate::claim::KpiClaim;
use crate::repair::{RepairPlan, RepairProbe};
use crate::table::SourceTable;
use crate::verdict::{
    Axis, ClaimIssue, NameCheck, Repair, StructuralIssue, ValueTier, Verdict,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds and confidence factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Absolute difference treated as an exact match.
    pub exact_tolerance: f64,
    /// Relative differences below this are valid with a small penalty.
    pub small_relative: f64,
    /// Relative differences below this (and above `small_relative`) are moderate.
    pub moderate_relative: f64,
    /// Denominator floor for relative differences.
    pub relative_floor: f64,
    /// A shifted cell is adopted only if its relative difference is below
    /// `shift_improvement_ratio` times the original one.
    pub shift_improvement_ratio: f64,

    pub case_mismatch_factor: f64,
    pub missing_row_name_factor: f64,
    pub missing_col_name_factor: f64,
    pub column_mismatch_factor: f64,
    pub small_diff_factor: f64,
    pub both_absent_factor: f64,
    pub shift_factor: f64,

    pub identity_confidence: f64,
    pub row_mismatch_confidence: f64,
    pub one_side_absent_confidence: f64,
    pub moderate_confidence: f64,
    pub large_confidence: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            exact_tolerance: 1e-6,
            small_relative: 0.01,
            moderate_relative: 0.05,
            relative_floor: 1e-9,
            shift_improvement_ratio: 0.5,
            case_mismatch_factor: 0.98,
            missing_row_name_factor: 0.95,
            missing_col_name_factor: 0.95,
            column_mismatch_factor: 0.9,
            small_diff_factor: 0.98,
            both_absent_factor: 0.95,
            shift_factor: 0.95,
            identity_confidence: 0.5,
            row_mismatch_confidence: 0.5,
            one_side_absent_confidence: 0.2,
            moderate_confidence: 0.7,
            large_confidence: 0.3,
        }
    }
}

impl ValidatorConfig {
    /// `|source - extracted| / max(|source|, floor)`.
    pub fn relative_diff(&self, source: f64, extracted: f64) -> f64 {
        (source - extracted).abs() / source.abs().max(self.relative_floor)
    }

    fn band(&self, source: f64, extracted: f64) -> Band {
        let diff = (source - extracted).abs();
        let rel = self.relative_diff(source, extracted);
        if diff <= self.exact_tolerance {
            Band::Exact
        } else if rel < self.small_relative {
            Band::Small(diff)
        } else if rel < self.moderate_relative {
            Band::Moderate(diff, rel)
        } else {
            Band::Large(diff, rel)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Band {
    Exact,
    Small(f64),
    Moderate(f64, f64),
    Large(f64, f64),
}

// ============================================================================
// Validator
// ============================================================================

/// Stateless validator; share one across threads.
#[derive(Debug, Default)]
pub struct IndexValidator {
    config: ValidatorConfig,
    repairs: RepairPlan,
}

impl IndexValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            repairs: RepairPlan::default(),
        }
    }

    pub fn with_repairs(mut self, repairs: RepairPlan) -> Self {
        self.repairs = repairs;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate one claim against its source table.
    pub fn validate(&self, claim: &KpiClaim, table: &SourceTable) -> Verdict {
        let cfg = &self.config;
        let mut v = Verdict::pending(claim.row_index, claim.col_index, claim.value);

        if claim.name_equals_key() {
            self.identity_failure(claim, table, &mut v);
            return v;
        }

        let (Some(row_raw), Some(col_raw)) = (claim.row_index, claim.col_index) else {
            v.invalidate(
                0.0,
                ClaimIssue::Structural {
                    issue: StructuralIssue::MissingIndex,
                },
                "Missing row_idx or col_idx",
            );
            return v;
        };

        if table.rows.is_empty() {
            v.invalidate(
                0.0,
                ClaimIssue::Structural {
                    issue: StructuralIssue::EmptyTable,
                },
                format!("Table {} has no rows", table.table_id),
            );
            return v;
        }

        let Some(row) = in_bounds(row_raw, table.row_count()) else {
            v.invalidate(
                0.0,
                ClaimIssue::Bounds {
                    axis: Axis::Row,
                    index: row_raw,
                    extent: table.row_count(),
                },
                format!(
                    "row_idx {row_raw} out of bounds (table has {} rows)",
                    table.row_count()
                ),
            );
            return v;
        };

        let width = table.row_width(row);
        let Some(col) = in_bounds(col_raw, width) else {
            v.invalidate(
                0.0,
                ClaimIssue::Bounds {
                    axis: Axis::Column,
                    index: col_raw,
                    extent: width,
                },
                format!("col_idx {col_raw} out of bounds (row {row} has {width} cols)"),
            );
            return v;
        };

        self.check_row_label(claim, table, row, col, &mut v);
        self.check_column_label(claim, table, row, col, &mut v);

        let text = table.cell(row, col).unwrap_or_default();
        v.source_cell_text = Some(text.to_string());
        v.source_cell_value = parse_cell(text);

        if v.source_cell_value.is_none() {
            let probe = probe(claim, row, col, None);
            if let Some(shift) = self.repairs.label_column.first(table, &probe, cfg) {
                v.note(format!(
                    "Auto-corrected col_idx {col}->{} (label column does not hold a value)",
                    shift.col_index
                ));
                self.adopt(&shift, table, &mut v);
            }
        }

        if !v.is_valid {
            return v;
        }

        self.compare(claim, table, row, &mut v);
        v
    }

    fn identity_failure(&self, claim: &KpiClaim, table: &SourceTable, v: &mut Verdict) {
        v.invalidate(
            self.config.identity_confidence,
            ClaimIssue::Structural {
                issue: StructuralIssue::NameEqualsKey,
            },
            format!(
                "name and key are identical ('{}'): the KPI identity is ambiguous",
                claim.name.trim()
            ),
        );
        v.instruct(format!(
            "name and key must differ. Table title: '{}'. Section: '{}'. Row label: '{}'.",
            table.title_or_unknown(),
            table.section_or_unknown(),
            claim.row_name.as_deref().unwrap_or("Unknown"),
        ));
        v.instruct(
            "Use the metric (e.g. from the title or section) for one field and the row entity for the other; do not repeat the same text.",
        );
    }

    fn check_row_label(
        &self,
        claim: &KpiClaim,
        table: &SourceTable,
        row: usize,
        col: usize,
        v: &mut Verdict,
    ) {
        let cfg = &self.config;
        let Some(expected) = table.row_label(row) else {
            v.row_name_check = Some(NameCheck::Unchecked);
            return;
        };
        v.row_name_match = Some(expected.to_string());

        let Some(claimed) = given_label(claim.row_name.as_deref()) else {
            v.row_name_check = Some(NameCheck::Missing);
            v.degrade(
                cfg.missing_row_name_factor,
                format!("⚠ row_name missing, using stub_col[{row}]='{expected}'"),
            );
            return;
        };

        match compare_labels(claimed, expected) {
            NameCheck::Exact => {
                v.row_name_check = Some(NameCheck::Exact);
                v.note("✓ row_name verified");
            }
            NameCheck::CaseOnly => {
                v.row_name_check = Some(NameCheck::CaseOnly);
                v.degrade(
                    cfg.case_mismatch_factor,
                    format!("⚠ row_name case mismatch: '{claimed}' vs '{expected}'"),
                );
            }
            _ => {
                v.row_name_check = Some(NameCheck::Mismatch);
                v.invalidate(
                    cfg.row_mismatch_confidence,
                    ClaimIssue::GroundingMismatch {
                        axis: Axis::Row,
                        claimed: claimed.to_string(),
                        expected: expected.to_string(),
                    },
                    format!("❌ row_name MISMATCH: claimed '{claimed}' but stub_col[{row}] is '{expected}'"),
                );
                let probe = probe(claim, row, col, None);
                match self.repairs.row_name.first(table, &probe, cfg) {
                    Some(hint) => v.instruct(format!(
                        "'{claimed}' is at row_idx {}; use row_idx {} instead of {row}",
                        hint.row_index, hint.row_index
                    )),
                    None => v.instruct(format!(
                        "'{claimed}' was not found in stub_col; row {row} is '{expected}'. Re-check the row_name or row_idx."
                    )),
                }
            }
        }
    }

    fn check_column_label(
        &self,
        claim: &KpiClaim,
        table: &SourceTable,
        row: usize,
        col: usize,
        v: &mut Verdict,
    ) {
        let cfg = &self.config;
        let Some(expected) = table.column_label(col) else {
            v.col_name_check = Some(NameCheck::Unchecked);
            return;
        };
        v.col_name_match = Some(expected.to_string());

        let Some(claimed) = given_label(claim.col_name.as_deref()) else {
            v.col_name_check = Some(NameCheck::Missing);
            v.degrade(
                cfg.missing_col_name_factor,
                format!("⚠ col_name missing, using merged_headers[{col}]='{expected}'"),
            );
            return;
        };

        match compare_labels(claimed, expected) {
            NameCheck::Exact => {
                v.col_name_check = Some(NameCheck::Exact);
                v.note("✓ col_name verified");
            }
            NameCheck::CaseOnly => {
                v.col_name_check = Some(NameCheck::CaseOnly);
                v.degrade(
                    cfg.case_mismatch_factor,
                    format!("⚠ col_name case mismatch: '{claimed}' vs '{expected}'"),
                );
            }
            _ => {
                v.col_name_check = Some(NameCheck::Mismatch);
                v.issues.push(ClaimIssue::GroundingMismatch {
                    axis: Axis::Column,
                    claimed: claimed.to_string(),
                    expected: expected.to_string(),
                });
                v.degrade(
                    cfg.column_mismatch_factor,
                    format!("⚠ col_name mismatch: claimed '{claimed}' but merged_headers[{col}] is '{expected}'"),
                );
                let probe = probe(claim, row, col, None);
                if let Some(hint) = self.repairs.column_name.first(table, &probe, cfg) {
                    v.instruct(format!(
                        "'{claimed}' is at col_idx {}; use col_idx {} instead of {col}",
                        hint.col_index, hint.col_index
                    ));
                }
            }
        }
    }

    fn compare(&self, claim: &KpiClaim, table: &SourceTable, row: usize, v: &mut Verdict) {
        let cfg = &self.config;
        let cell = v.source_cell_text.clone().unwrap_or_default();

        let (extracted, source) = match (claim.value, v.source_cell_value) {
            (None, None) => {
                v.degrade(cfg.both_absent_factor, format!("Both null (cell: '{cell}')"));
                return;
            }
            (Some(e), Some(s)) => (e, s),
            (extracted, source) => {
                let message = match extracted {
                    None => format!(
                        "Extracted null but source cell '{cell}' = {}",
                        source.unwrap_or_default()
                    ),
                    Some(e) => format!("Source cell '{cell}' is null but extracted {e}"),
                };
                v.invalidate(
                    cfg.one_side_absent_confidence,
                    ClaimIssue::ValueMismatch {
                        tier: ValueTier::OneSideAbsent,
                        extracted,
                        source,
                        relative_diff: None,
                    },
                    message,
                );
                return;
            }
        };

        let col = v.col_index.and_then(|c| usize::try_from(c).ok()).unwrap_or(0);
        match cfg.band(source, extracted) {
            Band::Exact => {}
            Band::Small(diff) => {
                v.degrade(cfg.small_diff_factor, format!("Small diff: {diff:.6}"));
            }
            Band::Moderate(diff, rel) => {
                v.invalidate(
                    cfg.moderate_confidence,
                    ClaimIssue::ValueMismatch {
                        tier: ValueTier::Moderate,
                        extracted: Some(extracted),
                        source: Some(source),
                        relative_diff: Some(rel),
                    },
                    format!(
                        "Value mismatch: extracted {extracted} vs source {source} ('{cell}'), diff {diff:.4} ({:.1}%)",
                        rel * 100.0
                    ),
                );
                let probe = probe(claim, row, col, Some(rel));
                match self.repairs.moderate_value.first(table, &probe, cfg) {
                    Some(hint) => v.instruct(format!(
                        "Value {extracted} is at row_idx {}, col_idx {}; update the indices",
                        hint.row_index, hint.col_index
                    )),
                    None => v.instruct(format!(
                        "Cell ({row}, {col}) holds {source}; use that value or correct the indices"
                    )),
                }
            }
            Band::Large(diff, rel) => {
                let probe = probe(claim, row, col, Some(rel));
                if let Some(shift) = self.repairs.value_shift.first(table, &probe, cfg) {
                    v.note(format!(
                        "Auto-corrected col_idx {col}->{} (value {extracted} found there)",
                        shift.col_index
                    ));
                    self.adopt(&shift, table, v);
                    self.retier(extracted, v);
                    return;
                }

                v.invalidate(
                    cfg.large_confidence,
                    ClaimIssue::ValueMismatch {
                        tier: ValueTier::Large,
                        extracted: Some(extracted),
                        source: Some(source),
                        relative_diff: Some(rel),
                    },
                    format!(
                        "Value MISMATCH: extracted {extracted} vs source {source} ('{cell}'), diff {diff:.4} ({:.1}%)",
                        rel * 100.0
                    ),
                );
                match self.repairs.large_value.first(table, &probe, cfg) {
                    Some(hint) => v.instruct(format!(
                        "Value {extracted} found at row_idx {}, col_idx {} (row_name '{}', col_name '{}'); update indices and names",
                        hint.row_index,
                        hint.col_index,
                        hint.row_name.as_deref().unwrap_or(""),
                        hint.col_name.as_deref().unwrap_or(""),
                    )),
                    None => v.instruct(format!(
                        "Value {extracted} is not near ({row}, {col}); re-locate the cell or use the source value {source}"
                    )),
                }
            }
        }
    }

    /// Re-tier the comparison after an adopted shift.
    fn retier(&self, extracted: f64, v: &mut Verdict) {
        let cfg = &self.config;
        let Some(source) = v.source_cell_value else {
            return;
        };
        match cfg.band(source, extracted) {
            Band::Exact => {}
            Band::Small(diff) => v.degrade(cfg.small_diff_factor, format!("Small diff: {diff:.6}")),
            Band::Moderate(_, rel) | Band::Large(_, rel) => {
                let (tier, confidence) = if rel < cfg.moderate_relative {
                    (ValueTier::Moderate, cfg.moderate_confidence)
                } else {
                    (ValueTier::Large, cfg.large_confidence)
                };
                v.invalidate(
                    confidence,
                    ClaimIssue::ValueMismatch {
                        tier,
                        extracted: Some(extracted),
                        source: Some(source),
                        relative_diff: Some(rel),
                    },
                    format!("Value mismatch after column shift: extracted {extracted} vs source {source}"),
                );
            }
        }
    }

    fn adopt(&self, shift: &Repair, table: &SourceTable, v: &mut Verdict) {
        let text = table
            .cell(shift.row_index, shift.col_index)
            .unwrap_or_default();
        v.row_index = Some(shift.row_index as i64);
        v.col_index = Some(shift.col_index as i64);
        v.source_cell_text = Some(text.to_string());
        v.source_cell_value = parse_cell(text);
        v.col_name_match = table.column_label(shift.col_index).map(str::to_string);
        if v.is_valid {
            v.confidence = v.confidence.degrade(self.config.shift_factor);
        }
        v.applied_repairs.push(shift.clone());
    }
}

/// Validate with default thresholds and strategies.
pub fn validate(claim: &KpiClaim, table: &SourceTable) -> Verdict {
    IndexValidator::default().validate(claim, table)
}

fn in_bounds(index: i64, extent: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|i| *i < extent)
}

/// Blank labels count as absent.
fn given_label(label: Option<&str>) -> Option<&str> {
    label.map(str::trim).filter(|l| !l.is_empty())
}

fn compare_labels(claimed: &str, expected: &str) -> NameCheck {
    let (a, b) = (claimed.trim(), expected.trim());
    if a == b {
        NameCheck::Exact
    } else if a.to_lowercase() == b.to_lowercase() {
        NameCheck::CaseOnly
    } else {
        NameCheck::Mismatch
    }
}

fn probe(claim: &KpiClaim, row: usize, col: usize, relative_diff: Option<f64>) -> RepairProbe<'_> {
    RepairProbe {
        row,
        col,
        extracted: claim.value,
        row_name: claim.row_name.as_deref(),
        col_name: claim.col_name.as_deref(),
        relative_diff,
    }
}
