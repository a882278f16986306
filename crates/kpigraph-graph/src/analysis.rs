//! How many temporal chains each grouping key would produce.
//!
//! Compares grouping by `name`, by `(name, key)` and by
//! `(name, key, units)`. Linking uses `(name, key)`; the other two show what
//! coarser or finer identities would do to the chain count.

use kpigraph_core::VerifiedKpi;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    Name,
    NameKey,
    NameKeyUnits,
}

impl GroupingStrategy {
    pub const ALL: [GroupingStrategy; 3] = [
        GroupingStrategy::Name,
        GroupingStrategy::NameKey,
        GroupingStrategy::NameKeyUnits,
    ];

    pub fn label(self) -> &'static str {
        match self {
            GroupingStrategy::Name => "name",
            GroupingStrategy::NameKey => "(name, key)",
            GroupingStrategy::NameKeyUnits => "(name, key, units)",
        }
    }

    fn group_label(self, kpi: &VerifiedKpi) -> String {
        let units = kpi.units.as_deref().unwrap_or("None");
        match self {
            GroupingStrategy::Name => kpi.name.clone(),
            GroupingStrategy::NameKey => format!("{} | {}", kpi.name, kpi.key),
            GroupingStrategy::NameKeyUnits => format!("{} | {} | {units}", kpi.name, kpi.key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub label: String,
    pub size: usize,
    pub years: Vec<i32>,
    pub distinct_keys: usize,
    pub distinct_units: usize,
    /// Values in year order; absent years sort first.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy: GroupingStrategy,
    pub groups: usize,
    pub multi_year_groups: usize,
    pub average_size: f64,
    pub largest: Vec<GroupSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingAnalysis {
    pub total_kpis: usize,
    pub strategies: Vec<StrategySummary>,
}

impl GroupingAnalysis {
    pub fn get(&self, strategy: GroupingStrategy) -> Option<&StrategySummary> {
        self.strategies.iter().find(|s| s.strategy == strategy)
    }
}

/// Summarise every grouping strategy, keeping the `top` largest groups each.
pub fn analyze_grouping(kpis: &[VerifiedKpi], top: usize) -> GroupingAnalysis {
    let strategies = GroupingStrategy::ALL
        .iter()
        .map(|&strategy| summarize(kpis, strategy, top))
        .collect();
    GroupingAnalysis {
        total_kpis: kpis.len(),
        strategies,
    }
}

fn summarize(kpis: &[VerifiedKpi], strategy: GroupingStrategy, top: usize) -> StrategySummary {
    let mut groups: BTreeMap<String, Vec<&VerifiedKpi>> = BTreeMap::new();
    for kpi in kpis {
        groups.entry(strategy.group_label(kpi)).or_default().push(kpi);
    }

    let mut summaries: Vec<GroupSummary> = groups
        .into_iter()
        .map(|(label, members)| {
            let years: BTreeSet<i32> = members.iter().filter_map(|k| k.year).collect();
            let keys: BTreeSet<&str> = members.iter().map(|k| k.key.as_str()).collect();
            let units: BTreeSet<Option<&str>> = members.iter().map(|k| k.units.as_deref()).collect();
            let mut ordered = members.clone();
            ordered.sort_by_key(|k| k.year);
            GroupSummary {
                label,
                size: members.len(),
                years: years.into_iter().collect(),
                distinct_keys: keys.len(),
                distinct_units: units.len(),
                values: ordered.iter().map(|k| k.value).collect(),
            }
        })
        .collect();

    let groups = summaries.len();
    let multi_year_groups = summaries.iter().filter(|g| g.years.len() >= 2).count();
    let average_size = if groups == 0 {
        0.0
    } else {
        kpis.len() as f64 / groups as f64
    };
    summaries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.label.cmp(&b.label)));
    summaries.truncate(top);

    StrategySummary {
        strategy,
        groups,
        multi_year_groups,
        average_size,
        largest: summaries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kpigraph_core::Evidence;

    fn kpi(name: &str, key: &str, units: &str, year: i32, value: f64) -> VerifiedKpi {
        VerifiedKpi {
            name: name.into(),
            key: key.into(),
            units: Some(units.into()),
            value: Some(value),
            year: Some(year),
            evidence: Evidence {
                table_id: "t".into(),
                row_index: Some(0),
                col_index: Some(1),
                row_name: None,
                col_name: None,
                confidence: None,
                source_model: None,
            },
        }
    }

    #[test]
    fn finer_keys_split_groups() {
        let kpis = vec![
            kpi("Sales", "Audi", "€ million", 2020, 1.0),
            kpi("Sales", "Audi", "€ million", 2021, 2.0),
            kpi("Sales", "Audi", "%", 2021, 3.0),
            kpi("Sales", "Seat", "€ million", 2021, 4.0),
        ];
        let analysis = analyze_grouping(&kpis, 10);
        assert_eq!(analysis.total_kpis, 4);

        let by_name = analysis.get(GroupingStrategy::Name).unwrap();
        assert_eq!(by_name.groups, 1);
        assert_eq!(by_name.largest[0].distinct_keys, 2);
        assert_eq!(by_name.largest[0].distinct_units, 2);

        let by_key = analysis.get(GroupingStrategy::NameKey).unwrap();
        assert_eq!(by_key.groups, 2);
        assert_eq!(by_key.multi_year_groups, 1);
        assert_relative_eq!(by_key.average_size, 2.0);
        assert_eq!(by_key.largest[0].label, "Sales | Audi");
        assert_eq!(by_key.largest[0].years, vec![2020, 2021]);

        let by_units = analysis.get(GroupingStrategy::NameKeyUnits).unwrap();
        assert_eq!(by_units.groups, 3);
        assert_eq!(by_units.largest[0].values, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn top_limits_reported_groups_not_counts() {
        let kpis: Vec<_> = (0..5)
            .map(|i| kpi("Sales", &format!("Brand{i}"), "units", 2021, i as f64))
            .collect();
        let by_key = analyze_grouping(&kpis, 2)
            .get(GroupingStrategy::NameKey)
            .cloned()
            .unwrap();
        assert_eq!(by_key.groups, 5);
        assert_eq!(by_key.largest.len(), 2);
    }

    #[test]
    fn empty_input() {
        let analysis = analyze_grouping(&[], 5);
        assert!(analysis.strategies.iter().all(|s| s.groups == 0 && s.average_size == 0.0));
    }
}
