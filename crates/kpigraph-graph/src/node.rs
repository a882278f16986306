use kpigraph_core::{Evidence, VerifiedKpi};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-derived node identity: SHA-256 hex of `name|key|year|value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KpiId(String);

impl KpiId {
    pub fn of(name: &str, key: &str, year: Option<i32>, value: Option<f64>) -> Self {
        let year = year.map_or_else(|| "None".to_string(), |y| y.to_string());
        let value = value.map_or_else(|| "None".to_string(), render_value);
        let composite = format!("{name}|{key}|{year}|{value}");

        let mut hasher = Sha256::new();
        hasher.update(composite.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        KpiId(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for KpiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Debug formatting keeps the `.0` on integral values.
fn render_value(v: f64) -> String {
    format!("{v:?}")
}

/// One verified KPI in the graph. `next` / `prev` refer to other nodes by id.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: KpiId,
    pub name: String,
    pub key: String,
    pub units: Option<String>,
    pub value: Option<f64>,
    pub year: Option<i32>,
    pub evidence: Option<Evidence>,
    pub next: Option<KpiId>,
    pub prev: Option<KpiId>,
}

impl GraphNode {
    pub fn from_kpi(kpi: VerifiedKpi) -> Self {
        Self {
            id: KpiId::of(&kpi.name, &kpi.key, kpi.year, kpi.value),
            name: kpi.name,
            key: kpi.key,
            units: kpi.units,
            value: kpi.value,
            year: kpi.year,
            evidence: Some(kpi.evidence),
            next: None,
            prev: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.next.is_some() || self.prev.is_some()
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.key)
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} / {}", self.id.short(), self.name, self.key)?;
        match self.year {
            Some(y) => write!(f, " ({y})")?,
            None => write!(f, " (no year)")?,
        }
        match self.value {
            Some(v) => write!(f, " = {v}"),
            None => write!(f, " = null"),
        }
    }
}
