//! `kpigraph correct`: run the correction loop over every table of a file.
//!
//! Several backends turn extraction into an ensemble: each model extracts and
//! corrects every table on its own and all verified claims are kept.

use crate::backend::BackendArgs;
use crate::validate::{read_extraction, write_json};
use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use kpigraph_core::{
    accuracy_percent, year_from_file_name, IndexValidator, JsonlTableStore, KpiClaim, SourceTable,
    TableProvider, VerifiedKpi,
};
use kpigraph_llm_sync::{
    CorrectionConfig, CorrectionOrchestrator, GenerationService, LlmBackend, TableOutcome,
    Termination, UnresolvedClaim,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CorrectArgs {
    pub tables: PathBuf,
    pub extraction: Option<PathBuf>,
    pub out: PathBuf,
    pub backend: BackendArgs,
    pub max_iterations: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_output_tokens: Option<usize>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct CorrectionSummary {
    pub tables: usize,
    pub all_valid: usize,
    pub iterations_exhausted: usize,
    pub external_failures: usize,
    pub valid_kpis: usize,
    pub unresolved_kpis: usize,
    pub accuracy: f64,
}

/// Written to `--out`; `valid_kpis` is readable by `kpigraph link`.
///
/// `tables` holds one outcome per table and model.
#[derive(Debug, Serialize)]
pub struct CorrectionReport {
    pub source_file: Option<String>,
    pub year: Option<i32>,
    pub backend: String,
    pub models_used: Vec<String>,
    pub config: CorrectionConfig,
    pub statistics: CorrectionSummary,
    pub valid_kpis: Vec<VerifiedKpi>,
    pub unresolved_kpis: Vec<UnresolvedClaim>,
    pub tables: Vec<TableOutcome>,
}

enum Work {
    Claims(Arc<SourceTable>, Vec<KpiClaim>),
    Extract(Arc<SourceTable>),
}

fn plan(args: &CorrectArgs, store: &JsonlTableStore) -> Result<Vec<Work>> {
    let Some(path) = &args.extraction else {
        return Ok(store
            .ids()
            .filter_map(|id| store.table(id))
            .map(Work::Extract)
            .collect());
    };
    let file = read_extraction(path)?;
    let mut work = Vec::new();
    for entry in file.tables {
        match store.table(&entry.table_id) {
            Some(table) => work.push(Work::Claims(table, entry.extraction_result.kpis)),
            None => tracing::warn!(table_id = %entry.table_id, "table not found, skipping"),
        }
    }
    Ok(work)
}

pub fn summarize(outcomes: &[TableOutcome]) -> CorrectionSummary {
    let mut s = CorrectionSummary {
        tables: outcomes.len(),
        ..CorrectionSummary::default()
    };
    for outcome in outcomes {
        match outcome.termination {
            Termination::AllValid => s.all_valid += 1,
            Termination::IterationsExhausted => s.iterations_exhausted += 1,
            Termination::ExternalFailure(_) => s.external_failures += 1,
        }
        s.valid_kpis += outcome.verified.len();
        s.unresolved_kpis += outcome.unresolved.len();
    }
    s.accuracy = accuracy_percent(s.valid_kpis, s.valid_kpis + s.unresolved_kpis);
    s
}

pub fn cmd_correct(args: &CorrectArgs) -> Result<()> {
    let config = CorrectionConfig::resolve(args.max_iterations, args.timeout_secs, args.max_output_tokens)?;
    let backends = args.backend.resolve_all()?;
    if backends.len() > 1 && args.extraction.is_some() {
        bail!(
            "{} backends given: an ensemble extracts every table itself, drop --extraction",
            backends.len()
        );
    }
    let services = backends
        .iter()
        .map(|backend| {
            backend
                .build(config.timeout(), config.max_output_tokens)
                .map_err(|e| anyhow!("failed to start {}: {e}", backend.describe()))
        })
        .collect::<Result<Vec<Arc<dyn GenerationService>>>>()?;
    let described = backends
        .iter()
        .map(LlmBackend::describe)
        .collect::<Vec<_>>()
        .join(", ");
    let store = JsonlTableStore::load(&args.tables)?;
    let work = plan(args, &store)?;

    println!(
        "{} {} table(s) with {} (max {} iteration(s))",
        "Correcting".green().bold(),
        work.len(),
        described,
        config.max_iterations
    );

    let orchestrator = CorrectionOrchestrator::new(
        IndexValidator::new(config.validator.clone()),
        config.max_iterations,
    );
    let outcomes: Mutex<Vec<TableOutcome>> = Mutex::new(Vec::with_capacity(work.len()));
    let process = |item: &Work| {
        let produced = match item {
            Work::Claims(table, claims) => {
                vec![orchestrator.run(table, claims.clone(), services[0].as_ref())]
            }
            Work::Extract(table) => orchestrator.extract_ensemble(table, &services).outcomes,
        };
        for outcome in &produced {
            print_outcome(outcome);
        }
        outcomes.lock().extend(produced);
    };
    if backends.iter().any(LlmBackend::is_order_sensitive) {
        if args.jobs.is_some_and(|jobs| jobs > 1) {
            tracing::info!("replay backend: processing tables one at a time");
        }
        work.iter().for_each(&process);
    } else {
        let run = || work.par_iter().for_each(&process);
        match args.jobs {
            Some(jobs) => rayon::ThreadPoolBuilder::new()
                .num_threads(jobs.max(1))
                .build()
                .context("failed to build worker pool")?
                .install(run),
            None => run(),
        }
    }

    let order: Vec<&str> = store.ids().collect();
    let models: Vec<&str> = services.iter().map(|s| s.model_name()).collect();
    let mut outcomes = outcomes.into_inner();
    outcomes.sort_by_key(|o| {
        (
            order.iter().position(|id| *id == o.table_id),
            models.iter().position(|m| *m == o.model),
        )
    });

    let source_file = args
        .extraction
        .as_deref()
        .or(Some(args.tables.as_path()))
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());
    let report = CorrectionReport {
        year: source_file.as_deref().and_then(year_from_file_name),
        source_file,
        backend: described,
        models_used: models.iter().map(|m| m.to_string()).collect(),
        statistics: summarize(&outcomes),
        valid_kpis: outcomes.iter().flat_map(|o| o.verified.iter().cloned()).collect(),
        unresolved_kpis: outcomes.iter().flat_map(|o| o.unresolved.iter().cloned()).collect(),
        config,
        tables: outcomes,
    };

    let s = &report.statistics;
    println!();
    println!("{}", "Summary".bold());
    println!("  tables:               {}", s.tables);
    println!("  all valid:            {}", s.all_valid.to_string().green());
    println!("  budget exhausted:     {}", s.iterations_exhausted.to_string().yellow());
    println!("  external failures:    {}", s.external_failures.to_string().red());
    println!("  valid / unresolved:   {} / {}", s.valid_kpis, s.unresolved_kpis);
    println!("  accuracy:             {:.2}%", s.accuracy);

    write_json(&args.out, &report)?;
    eprintln!("{} {}", "wrote".green().bold(), args.out.display().to_string().bold());
    Ok(())
}

fn print_outcome(outcome: &TableOutcome) {
    let last = outcome.rounds.last();
    let status = match &outcome.termination {
        Termination::AllValid => "all valid".green(),
        Termination::IterationsExhausted => "budget exhausted".yellow(),
        Termination::ExternalFailure(_) => "failed".red(),
    };
    println!(
        "  {:<32} {:<24} {:<18} rounds={} valid={} unresolved={}{}",
        outcome.table_id,
        outcome.model,
        status,
        outcome.rounds.len(),
        last.map_or(0, |r| r.valid_count),
        outcome.unresolved.len(),
        outcome
            .failure()
            .map(|f| format!(" ({f})"))
            .unwrap_or_default()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use std::fs;

    const TABLES: &str = r#"{"table_id": "p1", "title": "Brand Production", "rows": [["Audi", "1.692,8"], ["Seat", "574,1"]], "stub_col": ["Audi", "Seat"], "merged_headers": ["", "2021"]}"#;

    const TWO_TABLES: &str = concat!(
        r#"{"table_id": "p1", "title": "Brand Production", "rows": [["Audi", "1.692,8"], ["Seat", "574,1"]], "stub_col": ["Audi", "Seat"], "merged_headers": ["", "2021"]}"#,
        "\n",
        r#"{"table_id": "p2", "title": "Brand Production", "rows": [["Skoda", "1.242,8"], ["Cupra", "100"]], "stub_col": ["Skoda", "Cupra"], "merged_headers": ["", "2021"]}"#,
    );

    fn backend(replays: Vec<PathBuf>) -> BackendArgs {
        BackendArgs {
            backends: vec![BackendKind::Replay],
            models: Vec::new(),
            host: None,
            base_url: None,
            program: None,
            args: Vec::new(),
            replays,
        }
    }

    fn kpi(key: &str, value: f64, row: i64, row_name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "Production", "key": key, "value": value, "year": 2021,
            "row_idx": row, "col_idx": 1, "row_name": row_name, "col_name": "2021"
        })
    }

    fn args(dir: &Path, extraction: Option<PathBuf>, replays: Vec<PathBuf>, jobs: Option<usize>) -> CorrectArgs {
        CorrectArgs {
            tables: dir.join("linked_tables(2021).jsonl"),
            extraction,
            out: dir.join("corrected.json"),
            backend: backend(replays),
            max_iterations: Some(3),
            timeout_secs: Some(0),
            max_output_tokens: None,
            jobs,
        }
    }

    fn read_report(dir: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(dir.join("corrected.json")).unwrap()).unwrap()
    }

    #[test]
    fn corrects_from_replay_and_writes_linkable_report() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("linked_tables(2021).jsonl");
        fs::write(&tables, TABLES).unwrap();
        let extraction = dir.path().join("kpis_linked_tables(2021).json");
        fs::write(
            &extraction,
            r#"{"tables": [{"table_id": "p1", "extraction_result": {"kpis": [
                {"name": "Production", "key": "Seat", "value": 574.1, "year": 2021, "row_idx": 0, "col_idx": 1, "row_name": "Audi", "col_name": "2021"}
            ]}}]}"#,
        )
        .unwrap();
        let fixed = r#"{"kpis": [{"name": "Production", "key": "Seat", "value": 574.1, "year": 2021, "row_idx": 1, "col_idx": 1, "row_name": "Seat", "col_name": "2021"}]}"#;
        let replay = dir.path().join("replies.json");
        fs::write(&replay, serde_json::to_string(&vec![fixed]).unwrap()).unwrap();
        let out = dir.path().join("corrected.json");

        cmd_correct(&CorrectArgs {
            tables,
            extraction: Some(extraction),
            out: out.clone(),
            backend: backend(vec![replay]),
            max_iterations: Some(3),
            timeout_secs: Some(0),
            max_output_tokens: None,
            jobs: Some(1),
        })
        .unwrap();

        let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(report["year"], 2021);
        assert_eq!(report["statistics"]["all_valid"], 1);
        assert_eq!(report["valid_kpis"][0]["evidence"]["row_idx"], 1);
        assert_eq!(report["valid_kpis"][0]["evidence"]["source_model"], "replay:replies");
        assert_eq!(report["tables"][0]["termination"]["status"], "all_valid");
    }

    #[test]
    fn replay_tables_get_their_own_recorded_replies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("linked_tables(2021).jsonl"), TWO_TABLES).unwrap();
        let extraction = dir.path().join("kpis_linked_tables(2021).json");
        let claims = serde_json::json!({"tables": [
            {"table_id": "p1", "extraction_result": {"kpis": [kpi("Seat", 574.1, 0, "Audi")]}},
            {"table_id": "p2", "extraction_result": {"kpis": [kpi("Cupra", 100.0, 0, "Skoda")]}},
        ]});
        fs::write(&extraction, claims.to_string()).unwrap();
        let replies = vec![
            serde_json::json!({"kpis": [kpi("Seat", 574.1, 1, "Seat")]}).to_string(),
            serde_json::json!({"kpis": [kpi("Cupra", 100.0, 1, "Cupra")]}).to_string(),
        ];
        let replay = dir.path().join("replies.json");
        fs::write(&replay, serde_json::to_string(&replies).unwrap()).unwrap();

        for _ in 0..5 {
            cmd_correct(&args(dir.path(), Some(extraction.clone()), vec![replay.clone()], Some(4))).unwrap();
            let report = read_report(dir.path());
            assert_eq!(report["statistics"]["all_valid"], 2);
            assert_eq!(report["tables"][0]["table_id"], "p1");
            assert_eq!(report["valid_kpis"][0]["key"], "Seat");
            assert_eq!(report["valid_kpis"][1]["key"], "Cupra");
        }
    }

    #[test]
    fn ensemble_keeps_one_outcome_per_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("linked_tables(2021).jsonl"), TABLES).unwrap();
        let good = dir.path().join("good.json");
        let extracted = serde_json::json!({"kpis": [kpi("Seat", 574.1, 1, "Seat")]}).to_string();
        fs::write(&good, serde_json::to_string(&vec![extracted]).unwrap()).unwrap();
        let broken = dir.path().join("broken.json");
        fs::write(&broken, r#"["no json here", "still none"]"#).unwrap();

        let mut both = args(dir.path(), None, vec![good, broken], None);
        cmd_correct(&both).unwrap();
        let report = read_report(dir.path());
        assert_eq!(report["models_used"], serde_json::json!(["replay:good", "replay:broken"]));
        assert_eq!(report["statistics"]["tables"], 2);
        assert_eq!(report["statistics"]["external_failures"], 1);
        assert_eq!(report["tables"][1]["model"], "replay:broken");
        assert_eq!(report["valid_kpis"].as_array().map(Vec::len), Some(1));
        assert_eq!(report["valid_kpis"][0]["evidence"]["source_model"], "replay:good");

        both.extraction = Some(dir.path().join("kpis.json"));
        assert!(cmd_correct(&both).is_err());
    }

    #[test]
    fn empty_summary_has_zero_accuracy() {
        assert_eq!(summarize(&[]).tables, 0);
        assert_eq!(summarize(&[]).accuracy, 0.0);
    }
}
