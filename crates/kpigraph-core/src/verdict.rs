//! Validation verdicts.
//!
//! A verdict is plain data: whether the claim is grounded, how confident the
//! validator is, and everything a correction prompt needs to fix it. Issues
//! found in a claim are recorded here, never raised as errors.

use serde::{Deserialize, Serialize};

// ============================================================================
// Confidence
// ============================================================================

/// Confidence in `[0, 1]`, degraded multiplicatively.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const FULL: Confidence = Confidence(1.0);
    pub const NONE: Confidence = Confidence(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::NONE;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Multiply by `factor`, staying in range.
    pub fn degrade(self, factor: f64) -> Self {
        Self::new(self.0 * factor)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::FULL
    }
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Row,
    Column,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Column => write!(f, "col"),
        }
    }
}

/// Outcome of comparing a claimed label with the authoritative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameCheck {
    Exact,
    CaseOnly,
    Mismatch,
    /// The claim carried no label.
    Missing,
    /// No authoritative label at that index.
    Unchecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralIssue {
    NameEqualsKey,
    MissingIndex,
    EmptyTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTier {
    /// Exactly one side is absent.
    OneSideAbsent,
    /// Relative difference in the moderate band.
    Moderate,
    /// Relative difference at or above the moderate band, no shift found.
    Large,
}

/// Why a claim failed (or was flagged), as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimIssue {
    Structural {
        issue: StructuralIssue,
    },
    Bounds {
        axis: Axis,
        index: i64,
        extent: usize,
    },
    GroundingMismatch {
        axis: Axis,
        claimed: String,
        expected: String,
    },
    ValueMismatch {
        tier: ValueTier,
        extracted: Option<f64>,
        source: Option<f64>,
        relative_diff: Option<f64>,
    },
}

impl ClaimIssue {
    pub fn is_grounding(&self) -> bool {
        matches!(self, ClaimIssue::GroundingMismatch { .. })
    }
}

// ============================================================================
// Repairs
// ============================================================================

/// An index correction proposed or applied by a repair strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repair {
    pub strategy: String,
    #[serde(rename = "row_idx")]
    pub row_index: usize,
    #[serde(rename = "col_idx")]
    pub col_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_name: Option<String>,
}

// ============================================================================
// Verdict
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_valid: bool,
    pub confidence: Confidence,
    pub errors: Vec<String>,
    pub fix_instructions: Vec<String>,
    #[serde(default)]
    pub issues: Vec<ClaimIssue>,
    pub source_cell_value: Option<f64>,
    pub source_cell_text: Option<String>,
    pub extracted_value: Option<f64>,
    #[serde(rename = "row_idx")]
    pub row_index: Option<i64>,
    #[serde(rename = "col_idx")]
    pub col_index: Option<i64>,
    pub row_name_match: Option<String>,
    pub col_name_match: Option<String>,
    pub row_name_check: Option<NameCheck>,
    pub col_name_check: Option<NameCheck>,
    /// Repairs the validator adopted (not merely suggested).
    #[serde(default)]
    pub applied_repairs: Vec<Repair>,
}

impl Verdict {
    /// A fresh, fully confident verdict at the claimed indices.
    pub fn pending(row_index: Option<i64>, col_index: Option<i64>, extracted: Option<f64>) -> Self {
        Self {
            is_valid: true,
            confidence: Confidence::FULL,
            errors: Vec::new(),
            fix_instructions: Vec::new(),
            issues: Vec::new(),
            source_cell_value: None,
            source_cell_text: None,
            extracted_value: extracted,
            row_index,
            col_index,
            row_name_match: None,
            col_name_match: None,
            row_name_check: None,
            col_name_check: None,
            applied_repairs: Vec::new(),
        }
    }

    /// Mark invalid. Confidence is pinned to `confidence`.
    pub fn invalidate(&mut self, confidence: f64, issue: ClaimIssue, error: impl Into<String>) {
        self.is_valid = false;
        self.confidence = Confidence::new(confidence);
        self.issues.push(issue);
        self.errors.push(error.into());
    }

    /// Lower confidence and record a warning. Validity is untouched, and an
    /// invalid verdict keeps the confidence its invalidation pinned.
    pub fn degrade(&mut self, factor: f64, warning: impl Into<String>) {
        if self.is_valid {
            self.confidence = self.confidence.degrade(factor);
        }
        self.errors.push(warning.into());
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn instruct(&mut self, instruction: impl Into<String>) {
        self.fix_instructions.push(instruction.into());
    }

    pub fn confidence(&self) -> f64 {
        self.confidence.value()
    }

    /// True when a grounding (row/column label) mismatch was recorded.
    pub fn has_grounding_issue(&self) -> bool {
        self.issues.iter().any(ClaimIssue::is_grounding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), 0.0);
        assert_relative_eq!(
            Confidence::FULL.degrade(0.98).degrade(0.95).value(),
            0.931,
            epsilon = 1e-12
        );
    }

    #[test]
    fn invalidation_pins_confidence() {
        let mut v = Verdict::pending(Some(0), Some(1), Some(1.0));
        v.degrade(0.9, "soft");
        v.invalidate(
            0.5,
            ClaimIssue::Structural {
                issue: StructuralIssue::NameEqualsKey,
            },
            "bad",
        );
        v.degrade(0.9, "after");
        assert!(!v.is_valid);
        assert_relative_eq!(v.confidence(), 0.5);
        assert_eq!(
            v.errors,
            vec!["soft".to_string(), "bad".to_string(), "after".to_string()]
        );
    }

    #[test]
    fn issues_serialize_with_kind_tag() {
        let issue = ClaimIssue::Bounds {
            axis: Axis::Row,
            index: 9,
            extent: 3,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "bounds");
        assert_eq!(json["axis"], "row");
    }
}
