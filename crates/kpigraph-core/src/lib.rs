//! kpigraph core: KPI claims, source tables, and cell-index validation.
//!
//! A generation service reads a financial table and claims "this value sits at
//! (row, col)". Nothing downstream trusts that claim until the validator has
//! looked at the cell:
//!
//! ```text
//!   KpiClaim ──┐
//!              ├──► IndexValidator ──► Verdict { is_valid, confidence,
//!   SourceTable┘        │                        errors, fix_instructions }
//!                       ▼
//!                 parse_cell (European / US / accounting formats)
//! ```
//!
//! Verdicts are data. Claim problems never surface as `Err`; they are listed
//! as `ClaimIssue`s together with fix instructions a correction prompt can
//! feed back to the model.

pub mod cell;
pub mod claim;
pub mod repair;
pub mod report;
pub mod table;
pub mod validator;
pub mod verdict;

mod wire;

pub use cell::parse_cell;
pub use claim::{ClaimSet, Evidence, ExtractionFile, KpiClaim, TableExtraction, VerifiedKpi};
pub use repair::{
    HeaderScan, LabelColumnShift, MooreNeighbourScan, NextColumnShift, OrthogonalNeighbourScan,
    RepairChain, RepairPlan, RepairProbe, RepairStrategy, RowLabelScan,
};
pub use report::{
    accuracy_percent, validate_extraction, validate_table, InvalidEntry, ValidationReport,
    ValidationStats,
};
pub use table::{year_from_file_name, JsonlTableStore, SourceTable, TableError, TableProvider};
pub use validator::{validate, IndexValidator, ValidatorConfig};
pub use verdict::{
    Axis, ClaimIssue, Confidence, NameCheck, Repair, StructuralIssue, ValueTier, Verdict,
};
