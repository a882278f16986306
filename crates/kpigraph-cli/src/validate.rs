//! `kpigraph validate`: check every extraction file against its year's tables.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use kpigraph_core::{
    validate_extraction, year_from_file_name, ExtractionFile, IndexValidator, JsonlTableStore,
    ValidationReport, ValidationStats,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// `linked_tables(<year>).jsonl` in `tables_dir`.
pub fn tables_file_for(tables_dir: &Path, year: i32) -> PathBuf {
    tables_dir.join(format!("linked_tables({year}).jsonl"))
}

pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_extraction(path: &Path) -> Result<ExtractionFile> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid extraction JSON in {}", path.display()))
}

pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Serialize)]
struct InvalidOnly<'a> {
    source_file: Option<&'a str>,
    year: Option<i32>,
    validation_method: &'a str,
    total_invalid: usize,
    invalid_kpis: &'a [kpigraph_core::InvalidEntry],
    statistics: &'a ValidationStats,
}

fn validate_file(validator: &IndexValidator, extraction: &Path, tables_dir: &Path) -> Result<ValidationReport> {
    let name = extraction
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let year = year_from_file_name(&name).ok_or_else(|| anyhow!("no year in file name {name}"))?;
    let tables_path = tables_file_for(tables_dir, year);
    let tables = JsonlTableStore::load(&tables_path)
        .with_context(|| format!("tables for {name}"))?;
    let file = read_extraction(extraction)?;

    let mut report = validate_extraction(validator, &file, &tables);
    report.source_file = Some(name);
    report.year = Some(year);
    Ok(report)
}

pub fn cmd_validate(tables_dir: &Path, extractions_dir: &Path, out_dir: &Path) -> Result<()> {
    let files = json_files(extractions_dir)?;
    if files.is_empty() {
        return Err(anyhow!("no extraction files in {}", extractions_dir.display()));
    }
    println!(
        "{} {} extraction file(s)",
        "Validating".green().bold(),
        files.len()
    );

    let validator = IndexValidator::default();
    let results: Mutex<Vec<(PathBuf, Result<ValidationReport>)>> = Mutex::new(Vec::new());
    files.par_iter().for_each(|path| {
        let outcome = validate_file(&validator, path, tables_dir);
        results.lock().push((path.clone(), outcome));
    });
    let mut results = results.into_inner();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut overall = ValidationStats::default();
    let mut processed = 0usize;
    for (path, outcome) in results {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                eprintln!("{} {}: {e:#}", "skipped".yellow().bold(), path.display());
                continue;
            }
        };
        processed += 1;
        print_stats(&stem, &report.statistics);

        write_json(&out_dir.join(format!("valid_{stem}.json")), &report)?;
        if !report.invalid_kpis.is_empty() {
            let invalid = InvalidOnly {
                source_file: report.source_file.as_deref(),
                year: report.year,
                validation_method: &report.validation_method,
                total_invalid: report.invalid_kpis.len(),
                invalid_kpis: &report.invalid_kpis,
                statistics: &report.statistics,
            };
            write_json(&out_dir.join(format!("invalid_{stem}.json")), &invalid)?;
        }
        overall.merge(&report.statistics);
    }

    println!();
    println!("{}", "Overall".bold());
    println!("  files processed:      {processed}");
    print_stats_body(&overall);
    eprintln!("{} {}", "wrote".green().bold(), out_dir.display().to_string().bold());
    Ok(())
}

fn print_stats(label: &str, stats: &ValidationStats) {
    println!();
    println!("{}", label.bold());
    print_stats_body(stats);
}

fn print_stats_body(stats: &ValidationStats) {
    let accuracy = format!("{:.2}%", stats.accuracy);
    let accuracy = if stats.invalid_kpis == 0 {
        accuracy.green()
    } else {
        accuracy.yellow()
    };
    println!("  tables processed:     {}", stats.tables_processed);
    if stats.tables_missing > 0 {
        println!("  tables missing:       {}", stats.tables_missing.to_string().red());
    }
    println!("  total KPIs:           {}", stats.total_kpis);
    println!("  valid / invalid:      {} / {}", stats.valid_kpis, stats.invalid_kpis);
    println!("  accuracy:             {accuracy}");
    println!(
        "  row_name ok / bad:    {} / {}",
        stats.row_name_verified, stats.row_name_mismatches
    );
    println!(
        "  col_name ok / bad:    {} / {}",
        stats.col_name_verified, stats.col_name_mismatches
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &str = r#"{"table_id": "p1", "rows": [["Audi", "1.692,8"]], "stub_col": ["Audi"], "merged_headers": ["", "2021"]}"#;
    const EXTRACTION: &str = r#"{"tables": [{"table_id": "p1", "extraction_result": {"kpis": [
        {"name": "Deliveries", "key": "Audi", "value": 1692.8, "year": 2021, "row_idx": 0, "col_idx": 1, "row_name": "Audi", "col_name": "2021"},
        {"name": "Deliveries", "key": "Audi", "value": 1.0, "year": 2021, "row_idx": 0, "col_idx": 1, "row_name": "Audi", "col_name": "2021"}
    ]}}]}"#;

    #[test]
    fn writes_valid_and_invalid_reports() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("tables");
        let extractions = dir.path().join("extractions");
        let out = dir.path().join("out");
        fs::create_dir_all(&tables).unwrap();
        fs::create_dir_all(&extractions).unwrap();
        fs::write(tables_file_for(&tables, 2021), TABLES).unwrap();
        fs::write(extractions.join("kpis_linked_tables(2021).json"), EXTRACTION).unwrap();
        fs::write(extractions.join("notes.txt"), "ignored").unwrap();

        cmd_validate(&tables, &extractions, &out).unwrap();

        let valid: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("valid_kpis_linked_tables(2021).json")).unwrap())
                .unwrap();
        assert_eq!(valid["year"], 2021);
        assert_eq!(valid["statistics"]["valid_kpis"], 1);
        let invalid: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("invalid_kpis_linked_tables(2021).json")).unwrap())
                .unwrap();
        assert_eq!(invalid["total_invalid"], 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_validate(dir.path(), dir.path(), dir.path()).is_err());
    }
}
