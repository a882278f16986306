//! Year-over-year linking.
//!
//! ```text
//!   VerifiedKpi* ──id──► dedup ──► group by (name, key) ──► drop year=None
//!                                                             │
//!                                     sort by year, first per year wins
//!                                                             │
//!                                   n[i].next = n[i+1], n[i+1].prev = n[i]
//! ```
//!
//! The graph owns every node in one `Vec`; links are ids resolved through
//! an index, so there are no reference cycles.

use crate::node::{GraphNode, KpiId};
use kpigraph_core::VerifiedKpi;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Two input records that hashed to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collision {
    pub id: KpiId,
    /// Input position of the record that was kept in place.
    pub first_index: usize,
    /// Input position of the record whose fields replaced it.
    pub duplicate_index: usize,
}

/// Several distinct nodes of one `(name, key)` group share a year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearConflict {
    pub name: String,
    pub key: String,
    pub year: i32,
    pub kept: KpiId,
    pub isolated: Vec<KpiId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub input_records: usize,
    pub total_nodes: usize,
    pub linked_nodes: usize,
    pub isolated_nodes: usize,
    pub chains: usize,
    pub longest_chain: usize,
    pub missing_year: usize,
    pub collisions: usize,
    pub year_conflicts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LinkedGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<KpiId, usize>,
    input_records: usize,
    collisions: Vec<Collision>,
    year_conflicts: Vec<YearConflict>,
}

/// Link verified KPIs into temporal chains.
pub fn link(kpis: impl IntoIterator<Item = VerifiedKpi>) -> LinkedGraph {
    let mut graph = LinkedGraph::default();
    let mut first_seen: HashMap<KpiId, usize> = HashMap::new();

    for (input_index, kpi) in kpis.into_iter().enumerate() {
        graph.input_records += 1;
        let node = GraphNode::from_kpi(kpi);
        match graph.index.get(&node.id) {
            Some(&pos) => {
                let first_index = first_seen.get(&node.id).copied().unwrap_or(input_index);
                tracing::debug!(id = node.id.short(), first_index, input_index, "duplicate KPI id");
                graph.collisions.push(Collision {
                    id: node.id.clone(),
                    first_index,
                    duplicate_index: input_index,
                });
                graph.nodes[pos] = node;
            }
            None => {
                first_seen.insert(node.id.clone(), input_index);
                graph.index.insert(node.id.clone(), graph.nodes.len());
                graph.nodes.push(node);
            }
        }
    }
    if !graph.collisions.is_empty() {
        tracing::warn!(collisions = graph.collisions.len(), "merged KPIs with identical ids");
    }

    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (pos, node) in graph.nodes.iter().enumerate() {
        if node.year.is_some() {
            groups
                .entry((node.name.clone(), node.key.clone()))
                .or_default()
                .push(pos);
        }
    }

    for ((name, key), mut members) in groups {
        members.sort_by_key(|&pos| graph.nodes[pos].year);

        let mut chain: Vec<usize> = Vec::with_capacity(members.len());
        let mut i = 0;
        while i < members.len() {
            let year = graph.nodes[members[i]].year;
            let mut j = i + 1;
            while j < members.len() && graph.nodes[members[j]].year == year {
                j += 1;
            }
            chain.push(members[i]);
            if j - i > 1 {
                let conflict = YearConflict {
                    name: name.clone(),
                    key: key.clone(),
                    year: year.unwrap_or_default(),
                    kept: graph.nodes[members[i]].id.clone(),
                    isolated: members[i + 1..j]
                        .iter()
                        .map(|&pos| graph.nodes[pos].id.clone())
                        .collect(),
                };
                tracing::warn!(
                    name = %conflict.name,
                    key = %conflict.key,
                    year = conflict.year,
                    isolated = conflict.isolated.len(),
                    "same-year values for one KPI; extras left unlinked"
                );
                graph.year_conflicts.push(conflict);
            }
            i = j;
        }

        for pair in chain.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            graph.nodes[a].next = Some(graph.nodes[b].id.clone());
            graph.nodes[b].prev = Some(graph.nodes[a].id.clone());
        }
    }

    graph
}

impl LinkedGraph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &KpiId) -> Option<&GraphNode> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn next_of(&self, node: &GraphNode) -> Option<&GraphNode> {
        node.next.as_ref().and_then(|id| self.get(id))
    }

    pub fn prev_of(&self, node: &GraphNode) -> Option<&GraphNode> {
        node.prev.as_ref().and_then(|id| self.get(id))
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn year_conflicts(&self) -> &[YearConflict] {
        &self.year_conflicts
    }

    /// Walk `next` pointers starting at `id`.
    pub fn chain_from<'a>(&'a self, id: &KpiId) -> impl Iterator<Item = &'a GraphNode> + 'a {
        std::iter::successors(self.get(id), move |node| self.next_of(node))
    }

    /// Every chain of two or more nodes, head first, in node order of heads.
    pub fn chains(&self) -> Vec<Vec<&GraphNode>> {
        self.nodes
            .iter()
            .filter(|n| n.prev.is_none() && n.next.is_some())
            .map(|head| self.chain_from(&head.id).collect())
            .collect()
    }

    pub fn stats(&self) -> LinkStats {
        let chains = self.chains();
        let linked_nodes = self.nodes.iter().filter(|n| n.is_linked()).count();
        LinkStats {
            input_records: self.input_records,
            total_nodes: self.nodes.len(),
            linked_nodes,
            isolated_nodes: self.nodes.len() - linked_nodes,
            chains: chains.len(),
            longest_chain: chains.iter().map(Vec::len).max().unwrap_or(0),
            missing_year: self.nodes.iter().filter(|n| n.year.is_none()).count(),
            collisions: self.collisions.len(),
            year_conflicts: self.year_conflicts.len(),
        }
    }
}
