use kpigraph_core::{IndexValidator, KpiClaim, SourceTable};
use kpigraph_llm_sync::{
    CorrectionOrchestrator, DeadlineService, ExternalFailure, GenerationError, GenerationService,
    LlmBackend, ScriptedService, Termination, UnresolvedReason,
};
use std::sync::Arc;
use std::time::Duration;

fn production_table() -> SourceTable {
    SourceTable::new(
        "vw_2021_p12",
        vec![
            vec!["Audi".into(), "1.692,8".into(), "1.680,5".into()],
            vec!["Seat".into(), "574,1".into(), "426,6".into()],
            vec!["Cupra".into(), "79,4".into(), "27,4".into()],
        ],
    )
    .with_title("Brand Production")
    .with_stub_col(vec!["Audi".into(), "Seat".into(), "Cupra".into()])
    .with_merged_headers(vec!["".into(), "2021".into(), "2020".into()])
}

fn claim(key: &str, value: f64, row: i64, col: i64, year: i32) -> KpiClaim {
    KpiClaim::new("Production", key)
        .with_value(value)
        .with_year(year)
        .at(row, col)
        .labelled(key, year.to_string())
}

#[test]
fn replay_backend_drives_a_two_round_correction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_cupra.json");
    // The first answer still has Cupra on the wrong row; the second one is right.
    let first = serde_json::json!({ "kpis": [
        claim("Audi", 1692.8, 0, 1, 2021),
        claim("Cupra", 79.4, 1, 1, 2021),
    ]})
    .to_string();
    let second = serde_json::json!({ "kpis": [
        claim("Audi", 1692.8, 0, 1, 2021),
        claim("Cupra", 79.4, 2, 1, 2021),
    ]})
    .to_string();
    std::fs::write(&path, serde_json::to_string(&vec![first, second]).unwrap()).unwrap();

    let service = LlmBackend::Replay { path }
        .build(Some(Duration::from_secs(5)), 1024)
        .unwrap();
    assert_eq!(service.model_name(), "replay:fix_cupra");

    let initial = vec![
        claim("Audi", 1692.8, 0, 1, 2021),
        claim("Cupra", 80.0, 1, 1, 2021),
    ];
    let outcome = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(
        &production_table(),
        initial,
        &service,
    );

    assert_eq!(outcome.termination, Termination::AllValid);
    assert_eq!(outcome.rounds.len(), 3);
    assert_eq!(outcome.rounds[1].invalid_count, 1);
    assert_eq!(outcome.verified.len(), 2);
    assert!(outcome.finished_at >= outcome.started_at);
    let cupra = outcome
        .verified
        .iter()
        .find(|k| k.key == "Cupra")
        .unwrap();
    assert_eq!(cupra.evidence.row_index, Some(2));
    assert_eq!(cupra.evidence.source_model.as_deref(), Some("replay:fix_cupra"));
}

struct Stalled;

impl GenerationService for Stalled {
    fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(String::new())
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

#[test]
fn deadline_expiry_ends_the_run_with_a_timeout() {
    let service = DeadlineService::new(Arc::new(Stalled), Some(Duration::from_millis(50)));
    let outcome = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(
        &production_table(),
        vec![claim("Seat", 1.0, 1, 2, 2020)],
        &service,
    );
    assert_eq!(
        outcome.failure(),
        Some(&ExternalFailure::Generation {
            error: GenerationError::Timeout(Duration::from_millis(50))
        })
    );
    assert_eq!(outcome.unresolved.len(), 1);
    assert_eq!(outcome.unresolved[0].reason, UnresolvedReason::ExternalFailure);
}

#[test]
fn exhausted_budget_and_service_failure_are_distinguishable() {
    let table = production_table();
    let bad = vec![claim("Seat", 1.0, 1, 2, 2020)];
    let orchestrator = CorrectionOrchestrator::new(IndexValidator::default(), 1);

    let exhausted = orchestrator.run(&table, bad.clone(), &ScriptedService::new("m"));
    assert_eq!(exhausted.termination, Termination::IterationsExhausted);
    assert_eq!(exhausted.unresolved[0].reason, UnresolvedReason::BudgetExhausted);

    let failing = ScriptedService::new("m").fail(GenerationError::from_backend_message(
        "CUDA error: out of memory",
    ));
    let failed = CorrectionOrchestrator::new(IndexValidator::default(), 2).run(&table, bad, &failing);
    assert!(matches!(
        failed.failure(),
        Some(ExternalFailure::Generation {
            error: GenerationError::ResourceExhausted(_)
        })
    ));
    assert_eq!(failed.unresolved[0].reason, UnresolvedReason::ExternalFailure);
}

#[cfg(unix)]
#[test]
fn echoing_command_backend_is_unparsable() {
    let service = LlmBackend::Command {
        program: "cat".into(),
        args: Vec::new(),
    }
    .build(Some(Duration::from_secs(10)), 256)
    .unwrap();
    let outcome = CorrectionOrchestrator::new(IndexValidator::default(), 2).run(
        &production_table(),
        vec![claim("Seat", 1.0, 1, 2, 2020)],
        &service,
    );
    assert!(matches!(
        outcome.failure(),
        Some(ExternalFailure::Unparsable { .. })
    ));
}
