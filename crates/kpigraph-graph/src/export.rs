//! JSON export of a linked graph, and loading of validated KPIs.
//!
//! Node records use the established wire names (`kpi_id`, `next_kpi_id`,
//! `prev_kpi_id`, `evidence`). Edges are derived by walking `next` pointers;
//! they are not stored on the graph itself.

use crate::linker::{LinkStats, LinkedGraph};
use crate::node::KpiId;
use kpigraph_core::{Evidence, VerifiedKpi};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TEMPORAL_EDGE: &str = "temporal";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub kpi_id: KpiId,
    pub name: String,
    pub key: String,
    pub units: Option<String>,
    pub value: Option<f64>,
    pub year: Option<i32>,
    pub next_kpi_id: Option<KpiId>,
    pub prev_kpi_id: Option<KpiId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: KpiId,
    pub target_id: KpiId,
    pub year_diff: i32,
    pub edge_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedGraph {
    pub total_nodes: usize,
    pub nodes: Vec<ExportNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<LinkStats>,
}

impl LinkedGraph {
    pub fn edges(&self) -> Vec<GraphEdge> {
        self.nodes()
            .iter()
            .filter_map(|node| {
                let next = self.next_of(node)?;
                Some(GraphEdge {
                    source_id: node.id.clone(),
                    target_id: next.id.clone(),
                    year_diff: next.year? - node.year?,
                    edge_type: TEMPORAL_EDGE.to_string(),
                })
            })
            .collect()
    }

    pub fn export(&self) -> ExportedGraph {
        let nodes = self
            .nodes()
            .iter()
            .map(|n| ExportNode {
                kpi_id: n.id.clone(),
                name: n.name.clone(),
                key: n.key.clone(),
                units: n.units.clone(),
                value: n.value,
                year: n.year,
                next_kpi_id: n.next.clone(),
                prev_kpi_id: n.prev.clone(),
                evidence: n.evidence.clone(),
            })
            .collect::<Vec<_>>();
        ExportedGraph {
            total_nodes: nodes.len(),
            nodes,
            edges: self.edges(),
            stats: Some(self.stats()),
        }
    }
}

impl ExportedGraph {
    /// Edges implied by the node records' `next_kpi_id` fields.
    pub fn edges_from_nodes(&self) -> Vec<GraphEdge> {
        let years: std::collections::HashMap<&KpiId, Option<i32>> =
            self.nodes.iter().map(|n| (&n.kpi_id, n.year)).collect();
        self.nodes
            .iter()
            .filter_map(|n| {
                let target = n.next_kpi_id.as_ref()?;
                let target_year = (*years.get(target)?)?;
                Some(GraphEdge {
                    source_id: n.kpi_id.clone(),
                    target_id: target.clone(),
                    year_diff: target_year - n.year?,
                    edge_type: TEMPORAL_EDGE.to_string(),
                })
            })
            .collect()
    }

    pub fn write_to(&self, writer: impl Write) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(writer, self)
    }

    pub fn read_from(reader: impl Read) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }
}

#[derive(Debug, Deserialize)]
struct ValidKpiFile {
    #[serde(default)]
    valid_kpis: Vec<VerifiedKpi>,
}

/// Read the `valid_kpis` array of a validation report file.
pub fn load_valid_kpis(path: impl AsRef<Path>) -> Result<Vec<VerifiedKpi>, GraphError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| GraphError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: ValidKpiFile =
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| GraphError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(path = %path.display(), kpis = parsed.valid_kpis.len(), "loaded valid KPIs");
    Ok(parsed.valid_kpis)
}
