//! KPI claims as emitted by a generation service, and their verified form.

use crate::verdict::Verdict;
use crate::wire;
use serde::{Deserialize, Serialize};

// ============================================================================
// Claims
// ============================================================================

/// An extracted KPI fact that has not been verified yet.
///
/// `row_index`/`col_index` travel as `row_idx`/`col_idx` on the wire; they
/// are signed because models do emit `-1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiClaim {
    #[serde(default, deserialize_with = "wire::string")]
    pub name: String,
    #[serde(default, deserialize_with = "wire::string")]
    pub key: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub units: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_i32")]
    pub year: Option<i32>,
    #[serde(
        rename = "row_idx",
        alias = "row_index",
        default,
        deserialize_with = "wire::opt_i64"
    )]
    pub row_index: Option<i64>,
    #[serde(
        rename = "col_idx",
        alias = "col_index",
        default,
        deserialize_with = "wire::opt_i64"
    )]
    pub col_index: Option<i64>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub row_name: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub col_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::opt_string"
    )]
    pub source_model: Option<String>,
}

impl KpiClaim {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn at(mut self, row: i64, col: i64) -> Self {
        self.row_index = Some(row);
        self.col_index = Some(col);
        self
    }

    pub fn labelled(mut self, row_name: impl Into<String>, col_name: impl Into<String>) -> Self {
        self.row_name = Some(row_name.into());
        self.col_name = Some(col_name.into());
        self
    }

    /// True when `name` and `key` are both non-empty and identical after trimming.
    pub fn name_equals_key(&self) -> bool {
        let name = self.name.trim();
        !name.is_empty() && name == self.key.trim()
    }

    /// `"name (key)"`, used in logs and prompts.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.key)
    }
}

/// The `{"kpis": [...]}` envelope every prompt asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    #[serde(default)]
    pub kpis: Vec<KpiClaim>,
}

impl ClaimSet {
    pub fn new(kpis: Vec<KpiClaim>) -> Self {
        Self { kpis }
    }

    pub fn len(&self) -> usize {
        self.kpis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }
}

/// One table's entry in an extraction file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableExtraction {
    pub table_id: String,
    #[serde(default)]
    pub extraction_result: ClaimSet,
}

/// Extraction file: `{"tables": [{"table_id": ..., "extraction_result": {"kpis": [...]}}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFile {
    #[serde(default)]
    pub tables: Vec<TableExtraction>,
}

// ============================================================================
// Verified KPIs
// ============================================================================

/// Where a verified value was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub table_id: String,
    #[serde(rename = "row_idx", alias = "row_index")]
    pub row_index: Option<i64>,
    #[serde(rename = "col_idx", alias = "col_index")]
    pub col_index: Option<i64>,
    #[serde(default)]
    pub row_name: Option<String>,
    #[serde(default)]
    pub col_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_model: Option<String>,
}

/// A claim that passed validation, with the indices the validator resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedKpi {
    #[serde(default, deserialize_with = "wire::string")]
    pub name: String,
    #[serde(default, deserialize_with = "wire::string")]
    pub key: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub units: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_i32")]
    pub year: Option<i32>,
    pub evidence: Evidence,
}

impl VerifiedKpi {
    /// Build from a claim and the verdict that accepted it.
    ///
    /// Indices come from the verdict, so shifts applied by the validator
    /// are carried into the evidence.
    pub fn from_verdict(claim: &KpiClaim, table_id: &str, verdict: &Verdict) -> Self {
        Self {
            name: claim.name.clone(),
            key: claim.key.clone(),
            units: claim.units.clone(),
            value: claim.value,
            year: claim.year,
            evidence: Evidence {
                table_id: table_id.to_string(),
                row_index: verdict.row_index.or(claim.row_index),
                col_index: verdict.col_index.or(claim.col_index),
                row_name: claim.row_name.clone(),
                col_name: verdict
                    .col_name_match
                    .clone()
                    .filter(|_| verdict.col_index != claim.col_index)
                    .or_else(|| claim.col_name.clone()),
                confidence: Some(verdict.confidence.value()),
                source_model: claim.source_model.clone(),
            },
        }
    }

    /// The claim with its indices corrected to the evidence.
    pub fn to_claim(&self) -> KpiClaim {
        KpiClaim {
            name: self.name.clone(),
            key: self.key.clone(),
            units: self.units.clone(),
            value: self.value,
            year: self.year,
            row_index: self.evidence.row_index,
            col_index: self.evidence.col_index,
            row_name: self.evidence.row_name.clone(),
            col_name: self.evidence.col_name.clone(),
            source_model: self.evidence.source_model.clone(),
        }
    }
}
