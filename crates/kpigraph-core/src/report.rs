//! Validation reports: per-file statistics plus the valid / invalid split.

use crate::claim::{ExtractionFile, KpiClaim, VerifiedKpi};
use crate::table::{SourceTable, TableProvider};
use crate::validator::IndexValidator;
use crate::verdict::{ClaimIssue, NameCheck, StructuralIssue, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_kpis: usize,
    pub valid_kpis: usize,
    pub invalid_kpis: usize,
    pub tables_processed: usize,
    /// Tables referenced by the extraction but absent from the provider.
    #[serde(default)]
    pub tables_missing: usize,
    pub row_name_verified: usize,
    pub col_name_verified: usize,
    pub row_name_mismatches: usize,
    pub col_name_mismatches: usize,
    /// Claims whose `name` equals their `key`.
    pub name_mismatches: usize,
    /// Percentage of valid claims, `0.0` when nothing was checked.
    pub accuracy: f64,
}

impl ValidationStats {
    pub fn record(&mut self, verdict: &Verdict) {
        self.total_kpis += 1;
        if verdict.is_valid {
            self.valid_kpis += 1;
        } else {
            self.invalid_kpis += 1;
        }
        match verdict.row_name_check {
            Some(NameCheck::Exact) => self.row_name_verified += 1,
            Some(NameCheck::Mismatch) => self.row_name_mismatches += 1,
            _ => {}
        }
        match verdict.col_name_check {
            Some(NameCheck::Exact) => self.col_name_verified += 1,
            Some(NameCheck::Mismatch) => self.col_name_mismatches += 1,
            _ => {}
        }
        let identity = ClaimIssue::Structural {
            issue: StructuralIssue::NameEqualsKey,
        };
        if verdict.issues.contains(&identity) {
            self.name_mismatches += 1;
        }
        self.refresh_accuracy();
    }

    pub fn merge(&mut self, other: &ValidationStats) {
        self.total_kpis += other.total_kpis;
        self.valid_kpis += other.valid_kpis;
        self.invalid_kpis += other.invalid_kpis;
        self.tables_processed += other.tables_processed;
        self.tables_missing += other.tables_missing;
        self.row_name_verified += other.row_name_verified;
        self.col_name_verified += other.col_name_verified;
        self.row_name_mismatches += other.row_name_mismatches;
        self.col_name_mismatches += other.col_name_mismatches;
        self.name_mismatches += other.name_mismatches;
        self.refresh_accuracy();
    }

    fn refresh_accuracy(&mut self) {
        self.accuracy = accuracy_percent(self.valid_kpis, self.total_kpis);
    }
}

/// `valid / total * 100`, or `0.0` for an empty set.
pub fn accuracy_percent(valid: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64 * 100.0
    }
}

/// An invalid claim and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidEntry {
    pub table_id: String,
    pub kpi: KpiClaim,
    pub validation: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub validation_method: String,
    pub statistics: ValidationStats,
    pub valid_kpis: Vec<VerifiedKpi>,
    pub invalid_kpis: Vec<InvalidEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            validation_method: "cell_index".to_string(),
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, other: ValidationReport) {
        self.statistics.merge(&other.statistics);
        self.valid_kpis.extend(other.valid_kpis);
        self.invalid_kpis.extend(other.invalid_kpis);
    }
}

/// Validate one table's claims.
pub fn validate_table(
    validator: &IndexValidator,
    table: &SourceTable,
    claims: &[KpiClaim],
) -> ValidationReport {
    let mut report = ValidationReport::new();
    report.statistics.tables_processed = 1;
    for claim in claims {
        let verdict = validator.validate(claim, table);
        report.statistics.record(&verdict);
        if verdict.is_valid {
            report
                .valid_kpis
                .push(VerifiedKpi::from_verdict(claim, &table.table_id, &verdict));
        } else {
            report.invalid_kpis.push(InvalidEntry {
                table_id: table.table_id.clone(),
                kpi: claim.clone(),
                validation: verdict,
            });
        }
    }
    report
}

/// Validate every table of an extraction file.
///
/// Tables the provider does not know are counted and skipped.
pub fn validate_extraction(
    validator: &IndexValidator,
    extraction: &ExtractionFile,
    tables: &dyn TableProvider,
) -> ValidationReport {
    let mut report = ValidationReport::new();
    for entry in &extraction.tables {
        let Some(table) = tables.table(&entry.table_id) else {
            tracing::warn!(table_id = %entry.table_id, "table not found, skipping");
            report.statistics.tables_missing += 1;
            continue;
        };
        report.absorb(validate_table(
            validator,
            &table,
            &entry.extraction_result.kpis,
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{ClaimSet, TableExtraction};
    use crate::table::JsonlTableStore;
    use approx::assert_relative_eq;

    fn store() -> JsonlTableStore {
        let table = SourceTable::new(
            "t1",
            vec![
                vec!["Revenue".into(), "10,5".into()],
                vec!["EBIT".into(), "2,1".into()],
            ],
        )
        .with_stub_col(vec!["Revenue".into(), "EBIT".into()])
        .with_merged_headers(vec!["".into(), "2021".into()]);
        JsonlTableStore::from_tables([table])
    }

    #[test]
    fn splits_valid_and_invalid_and_counts() {
        let good = KpiClaim::new("Revenue", "Group")
            .with_value(10.5)
            .with_year(2021)
            .at(0, 1)
            .labelled("Revenue", "2021");
        let wrong_row = KpiClaim::new("EBIT", "Group")
            .with_value(2.1)
            .at(1, 1)
            .labelled("Revenue", "2021");
        let identity = KpiClaim::new("EBIT", "EBIT").with_value(2.1).at(1, 1);

        let extraction = ExtractionFile {
            tables: vec![
                TableExtraction {
                    table_id: "t1".into(),
                    extraction_result: ClaimSet::new(vec![good, wrong_row, identity]),
                },
                TableExtraction {
                    table_id: "ghost".into(),
                    extraction_result: ClaimSet::default(),
                },
            ],
        };

        let report = validate_extraction(&IndexValidator::default(), &extraction, &store());
        let s = &report.statistics;
        assert_eq!(s.total_kpis, 3);
        assert_eq!(s.valid_kpis, 1);
        assert_eq!(s.invalid_kpis, 2);
        assert_eq!(s.tables_processed, 1);
        assert_eq!(s.tables_missing, 1);
        assert_eq!(s.row_name_verified, 1);
        assert_eq!(s.row_name_mismatches, 1);
        assert_eq!(s.name_mismatches, 1);
        assert_relative_eq!(s.accuracy, 100.0 / 3.0, epsilon = 1e-9);

        let valid = &report.valid_kpis[0];
        assert_eq!(valid.evidence.table_id, "t1");
        assert_eq!(valid.evidence.row_index, Some(0));
        assert_eq!(report.invalid_kpis[0].kpi.name, "EBIT");
    }

    #[test]
    fn empty_extraction_has_zero_accuracy() {
        let report =
            validate_extraction(&IndexValidator::default(), &ExtractionFile::default(), &store());
        assert_eq!(report.statistics.total_kpis, 0);
        assert_eq!(report.statistics.accuracy, 0.0);
    }

    #[test]
    fn report_json_uses_artifact_field_names() {
        let report = ValidationReport::new();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["validation_method"], "cell_index");
        assert!(json["statistics"]["accuracy"].is_number());
        assert!(json.get("source_file").is_none());
    }
}
