//! `kpigraph link`: build the temporal graph from validated KPIs.

use crate::validate::{json_files, write_json};
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use kpigraph_graph::{analyze_grouping, link, load_valid_kpis, GroupingAnalysis};
use std::path::Path;

pub fn cmd_link(valid: &Path, out: &Path, analyze: bool, top: usize) -> Result<()> {
    let files = if valid.is_dir() {
        json_files(valid)?
    } else {
        vec![valid.to_path_buf()]
    };
    if files.is_empty() {
        return Err(anyhow!("no validation files in {}", valid.display()));
    }

    let mut kpis = Vec::new();
    for path in &files {
        let loaded = load_valid_kpis(path).with_context(|| format!("loading {}", path.display()))?;
        println!("  {:<48} {} KPIs", path.display(), loaded.len());
        kpis.extend(loaded);
    }
    println!(
        "{} {} KPIs from {} file(s)",
        "Linking".green().bold(),
        kpis.len(),
        files.len()
    );

    if analyze {
        print_analysis(&analyze_grouping(&kpis, top));
    }

    let graph = link(kpis);
    let stats = graph.stats();
    println!("  nodes:                {}", stats.total_nodes);
    println!("  linked / isolated:    {} / {}", stats.linked_nodes, stats.isolated_nodes);
    println!("  chains:               {} (longest {})", stats.chains, stats.longest_chain);
    println!("  missing year:         {}", stats.missing_year);
    if stats.collisions > 0 {
        println!("  merged duplicates:    {}", stats.collisions.to_string().yellow());
    }
    if stats.year_conflicts > 0 {
        println!("  same-year conflicts:  {}", stats.year_conflicts.to_string().yellow());
    }

    write_json(out, &graph.export())?;
    eprintln!(
        "{} {} ({} nodes)",
        "wrote".green().bold(),
        out.display().to_string().bold(),
        graph.len()
    );
    Ok(())
}

fn print_analysis(analysis: &GroupingAnalysis) {
    println!();
    println!("{}", "Grouping analysis".bold());
    for summary in &analysis.strategies {
        println!();
        println!(
            "  by {:<20} groups={} multi-year={} avg size={:.2}",
            summary.strategy.label(),
            summary.groups,
            summary.multi_year_groups,
            summary.average_size
        );
        for (i, group) in summary.largest.iter().enumerate() {
            let values: Vec<String> = group
                .values
                .iter()
                .map(|v| v.map_or_else(|| "null".to_string(), |v| v.to_string()))
                .collect();
            println!(
                "    {:>2}. {} ({} KPIs, years {:?}, keys {}, units {}) [{}]",
                i + 1,
                group.label,
                group.size,
                group.years,
                group.distinct_keys,
                group.distinct_units,
                values.join(", ")
            );
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn valid_file(value: f64, year: i32) -> String {
        format!(
            r#"{{"valid_kpis": [{{"name": "Sales", "key": "Audi", "value": {value}, "year": {year},
                "evidence": {{"table_id": "t{year}", "row_idx": 0, "col_idx": 1}}}}]}}"#
        )
    }

    #[test]
    fn links_every_file_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let valid = dir.path().join("valid");
        fs::create_dir_all(&valid).unwrap();
        fs::write(valid.join("valid_2020.json"), valid_file(1.0, 2020)).unwrap();
        fs::write(valid.join("valid_2021.json"), valid_file(2.0, 2021)).unwrap();
        let out = dir.path().join("graph").join("kpi_graph.json");

        cmd_link(&valid, &out, true, 3).unwrap();

        let graph: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(graph["total_nodes"], 2);
        assert_eq!(graph["edges"].as_array().map(Vec::len), Some(1));
        assert_eq!(graph["nodes"][0]["next_kpi_id"], graph["nodes"][1]["kpi_id"]);
    }
}
