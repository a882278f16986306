//! Temporal KPI graph.
//!
//! Verified KPIs become nodes keyed by a content hash. Nodes with the same
//! `(name, key)` are chained by year:
//!
//! ```text
//!   Sales/Audi 2019 ──next──► Sales/Audi 2020 ──next──► Sales/Audi 2021
//!                   ◄──prev──                 ◄──prev──
//! ```
//!
//! Export writes nodes with `next_kpi_id` / `prev_kpi_id` plus the derived
//! `temporal` edges.

pub mod analysis;
pub mod export;
pub mod linker;
pub mod node;

pub use analysis::{analyze_grouping, GroupSummary, GroupingAnalysis, GroupingStrategy, StrategySummary};
pub use export::{load_valid_kpis, ExportNode, ExportedGraph, GraphEdge, GraphError, TEMPORAL_EDGE};
pub use linker::{link, Collision, LinkStats, LinkedGraph, YearConflict};
pub use node::{GraphNode, KpiId};
