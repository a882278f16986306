//! The validate → correct → re-validate loop for one table.
//!
//! ```text
//!   claims ──► validate all ──► all valid? ──yes──► AllValid
//!     ▲              │
//!     │              no ── last round? ──yes──► IterationsExhausted
//!     │              │
//!     │        correction prompt ──► service ──► parse ──fail──► recovery
//!     │                                 │                          │
//!     └────────── next claim set ◄──────┴──────────ok──────────────┤
//!                                                                  fail
//!                                                                   ▼
//!                                                            ExternalFailure
//! ```
//!
//! Each round's claim set is an owned value moved into the next round; the
//! loop never edits claims in place.

use crate::error::{ExternalFailure, ResponseError};
use crate::llm::GenerationService;
use crate::prompts::{correction_prompt, extraction_prompt, recovery_prompt};
use crate::response::{clean_response, decode_claims, truncate_preview};
use chrono::{DateTime, Utc};
use kpigraph_core::{
    accuracy_percent, IndexValidator, InvalidEntry, KpiClaim, SourceTable, Verdict, VerifiedKpi,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Outcome types
// ============================================================================

/// Statistics for one validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    pub iteration: usize,
    pub total: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub accuracy: f64,
    pub invalid: Vec<InvalidEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum Termination {
    AllValid,
    IterationsExhausted,
    ExternalFailure(ExternalFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    BudgetExhausted,
    ExternalFailure,
}

/// A claim still invalid when the run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedClaim {
    pub claim: KpiClaim,
    pub verdict: Verdict,
    pub reason: UnresolvedReason,
}

/// Everything one table's run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOutcome {
    pub session_id: Uuid,
    pub table_id: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub termination: Termination,
    pub rounds: Vec<RoundReport>,
    pub verified: Vec<VerifiedKpi>,
    pub unresolved: Vec<UnresolvedClaim>,
}

impl TableOutcome {
    pub fn is_all_valid(&self) -> bool {
        self.termination == Termination::AllValid
    }

    pub fn failure(&self) -> Option<&ExternalFailure> {
        match &self.termination {
            Termination::ExternalFailure(f) => Some(f),
            _ => None,
        }
    }

    pub fn correction_calls(&self) -> usize {
        self.rounds.len().saturating_sub(1)
    }
}

/// One table extracted and corrected by several models in turn.
///
/// `verified` concatenates each model's verified claims in model order;
/// `source_model` on each claim says which model produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleOutcome {
    pub table_id: String,
    pub models_used: Vec<String>,
    pub outcomes: Vec<TableOutcome>,
    pub verified: Vec<VerifiedKpi>,
}

impl EnsembleOutcome {
    pub fn outcome_for(&self, model: &str) -> Option<&TableOutcome> {
        self.outcomes.iter().find(|o| o.model == model)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &UnresolvedClaim> {
        self.outcomes.iter().flat_map(|o| o.unresolved.iter())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct CorrectionOrchestrator {
    validator: IndexValidator,
    max_iterations: usize,
}

struct Partition {
    valid: Vec<(KpiClaim, Verdict)>,
    invalid: Vec<InvalidEntry>,
}

impl CorrectionOrchestrator {
    pub fn new(validator: IndexValidator, max_iterations: usize) -> Self {
        Self {
            validator,
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Drive `claims` toward full validity.
    ///
    /// Rounds run `1..=max(max_iterations, 1)`; `max_iterations == 0` is a
    /// single validation pass with no service call.
    pub fn run(
        &self,
        table: &SourceTable,
        claims: Vec<KpiClaim>,
        service: &dyn GenerationService,
    ) -> TableOutcome {
        let mut run = Run::start(table, service);
        self.run_loop(&mut run, table, claims, service)
    }

    /// Ask the service for the initial extraction, then run the loop.
    pub fn extract_and_run(
        &self,
        table: &SourceTable,
        service: &dyn GenerationService,
    ) -> TableOutcome {
        let mut run = Run::start(table, service);
        let prompt = extraction_prompt(table);
        info!(table_id = %table.table_id, model = service.model_name(), "extracting");
        match request_claims(service, &prompt, &prompt, None) {
            Ok(claims) => {
                let claims = stamp(claims, service.model_name());
                info!(table_id = %table.table_id, kpis = claims.len(), "initial extraction parsed");
                self.run_loop(&mut run, table, claims, service)
            }
            Err(failure) => {
                warn!(table_id = %table.table_id, error = %failure, "initial extraction failed");
                run.finish(Termination::ExternalFailure(failure), Vec::new(), Vec::new())
            }
        }
    }

    /// [`extract_and_run`](Self::extract_and_run) once per service, in order.
    ///
    /// A failing model only ends its own run; the others still contribute.
    pub fn extract_ensemble<S: GenerationService>(
        &self,
        table: &SourceTable,
        services: &[S],
    ) -> EnsembleOutcome {
        let mut outcomes = Vec::with_capacity(services.len());
        for service in services {
            info!(table_id = %table.table_id, model = service.model_name(), "ensemble member");
            outcomes.push(self.extract_and_run(table, service));
        }
        let verified: Vec<VerifiedKpi> = outcomes
            .iter()
            .flat_map(|o| o.verified.iter().cloned())
            .collect();
        info!(
            table_id = %table.table_id,
            models = outcomes.len(),
            verified = verified.len(),
            "ensemble finished"
        );
        EnsembleOutcome {
            table_id: table.table_id.clone(),
            models_used: services.iter().map(|s| s.model_name().to_string()).collect(),
            outcomes,
            verified,
        }
    }

    fn run_loop(
        &self,
        run: &mut Run,
        table: &SourceTable,
        mut claims: Vec<KpiClaim>,
        service: &dyn GenerationService,
    ) -> TableOutcome {
        let rounds = self.max_iterations.max(1);
        let expected = claims.len();

        let mut iteration = 0;
        loop {
            iteration += 1;
            let Partition { valid, invalid } = self.partition(table, &claims);
            let report = RoundReport {
                iteration,
                total: claims.len(),
                valid_count: valid.len(),
                invalid_count: invalid.len(),
                accuracy: accuracy_percent(valid.len(), claims.len()),
                invalid: invalid.clone(),
            };
            info!(
                table_id = %table.table_id,
                iteration,
                total = report.total,
                valid = report.valid_count,
                invalid = report.invalid_count,
                accuracy = format!("{:.1}%", report.accuracy),
                "validation round"
            );
            run.rounds.push(report);

            if invalid.is_empty() {
                return run.finish(Termination::AllValid, valid, Vec::new());
            }
            if iteration == rounds {
                let unresolved = unresolved(invalid, UnresolvedReason::BudgetExhausted);
                return run.finish(Termination::IterationsExhausted, valid, unresolved);
            }

            let prompt = correction_prompt(table, &claims, &invalid, expected);
            let context = extraction_prompt(table);
            debug!(table_id = %table.table_id, iteration, chars = prompt.len(), "requesting correction");
            match request_claims(service, &prompt, &context, Some(expected)) {
                Ok(next) => {
                    if next.len() != expected {
                        warn!(
                            table_id = %table.table_id,
                            expected,
                            returned = next.len(),
                            "correction changed the claim count"
                        );
                    }
                    claims = stamp(next, service.model_name());
                }
                Err(failure) => {
                    warn!(table_id = %table.table_id, iteration, error = %failure, "correction failed");
                    let unresolved = unresolved(invalid, UnresolvedReason::ExternalFailure);
                    return run.finish(Termination::ExternalFailure(failure), valid, unresolved);
                }
            }
        }
    }

    fn partition(&self, table: &SourceTable, claims: &[KpiClaim]) -> Partition {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for claim in claims {
            let verdict = self.validator.validate(claim, table);
            if verdict.is_valid {
                valid.push((claim.clone(), verdict));
            } else {
                invalid.push(InvalidEntry {
                    table_id: table.table_id.clone(),
                    kpi: claim.clone(),
                    validation: verdict,
                });
            }
        }
        Partition { valid, invalid }
    }
}

struct Run {
    session_id: Uuid,
    table_id: String,
    model: String,
    started_at: DateTime<Utc>,
    rounds: Vec<RoundReport>,
}

impl Run {
    fn start(table: &SourceTable, service: &dyn GenerationService) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            table_id: table.table_id.clone(),
            model: service.model_name().to_string(),
            started_at: Utc::now(),
            rounds: Vec::new(),
        }
    }

    fn finish(
        &mut self,
        termination: Termination,
        valid: Vec<(KpiClaim, Verdict)>,
        unresolved: Vec<UnresolvedClaim>,
    ) -> TableOutcome {
        let verified = valid
            .iter()
            .map(|(claim, verdict)| VerifiedKpi::from_verdict(claim, &self.table_id, verdict))
            .collect();
        TableOutcome {
            session_id: self.session_id,
            table_id: self.table_id.clone(),
            model: self.model.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            termination,
            rounds: std::mem::take(&mut self.rounds),
            verified,
            unresolved,
        }
    }
}

fn unresolved(invalid: Vec<InvalidEntry>, reason: UnresolvedReason) -> Vec<UnresolvedClaim> {
    invalid
        .into_iter()
        .map(|entry| UnresolvedClaim {
            claim: entry.kpi,
            verdict: entry.validation,
            reason,
        })
        .collect()
}

fn stamp(claims: Vec<KpiClaim>, model: &str) -> Vec<KpiClaim> {
    claims
        .into_iter()
        .map(|mut c| {
            if c.source_model.is_none() {
                c.source_model = Some(model.to_string());
            }
            c
        })
        .collect()
}

/// One generation call plus at most one recovery call.
fn request_claims(
    service: &dyn GenerationService,
    prompt: &str,
    context: &str,
    expected: Option<usize>,
) -> Result<Vec<KpiClaim>, ExternalFailure> {
    let raw = service.generate(prompt)?;
    let error = match decode_claims(&raw, Some(prompt)) {
        Ok(set) => return Ok(set.kpis),
        Err(error) => error,
    };

    warn!(model = service.model_name(), %error, "unparsable reply, attempting JSON recovery");
    let cleaned = clean_response(&raw, Some(prompt));
    let recovery = recovery_prompt(context, &cleaned, &error.to_string(), expected);
    let raw = service.generate(&recovery)?;
    decode_claims(&raw, Some(&recovery))
        .map(|set| {
            info!(kpis = set.len(), "JSON recovery succeeded");
            set.kpis
        })
        .map_err(|error: ResponseError| ExternalFailure::Unparsable {
            error,
            preview: truncate_preview(&raw, 300),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::ScriptedService;
    use std::time::Duration;

    fn table() -> SourceTable {
        SourceTable::new(
            "t",
            vec![
                vec!["Audi".into(), "1.692,8".into(), "1.680,5".into()],
                vec!["Seat".into(), "574,1".into(), "426,6".into()],
            ],
        )
        .with_stub_col(vec!["Audi".into(), "Seat".into()])
        .with_merged_headers(vec!["".into(), "2019".into(), "2020".into()])
    }

    fn good() -> KpiClaim {
        KpiClaim::new("Deliveries", "Audi")
            .with_value(1692.8)
            .with_year(2019)
            .at(0, 1)
            .labelled("Audi", "2019")
    }

    fn bad() -> KpiClaim {
        KpiClaim::new("Deliveries", "Seat")
            .with_value(999.0)
            .with_year(2020)
            .at(1, 2)
            .labelled("Seat", "2020")
    }

    fn fixed_reply() -> String {
        serde_json::json!({
            "kpis": [
                good(),
                KpiClaim::new("Deliveries", "Seat").with_value(426.6).with_year(2020).at(1, 2).labelled("Seat", "2020"),
            ]
        })
        .to_string()
    }

    #[test]
    fn zero_iterations_validates_once_without_calling() {
        let svc = ScriptedService::new("m");
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 0).run(&table(), vec![good(), bad()], &svc);
        assert_eq!(svc.calls(), 0);
        assert_eq!(out.rounds.len(), 1);
        assert_eq!(out.termination, Termination::IterationsExhausted);
        assert_eq!(out.verified.len(), 1);
        assert_eq!(out.unresolved[0].reason, UnresolvedReason::BudgetExhausted);
    }

    #[test]
    fn all_valid_terminates_immediately_with_full_input() {
        let svc = ScriptedService::new("m");
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(&table(), vec![good()], &svc);
        assert!(out.is_all_valid());
        assert_eq!(svc.calls(), 0);
        assert_eq!(out.verified.len(), 1);
        assert_eq!(out.rounds[0].accuracy, 100.0);
    }

    #[test]
    fn correction_round_fixes_claims_and_stamps_model() {
        let svc = ScriptedService::new("qwen").reply(fixed_reply());
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(&table(), vec![good(), bad()], &svc);
        assert!(out.is_all_valid());
        assert_eq!(svc.calls(), 1);
        assert_eq!(out.rounds.len(), 2);
        assert_eq!(out.rounds[0].invalid_count, 1);
        assert_eq!(out.rounds[0].accuracy, 50.0);
        assert_eq!(out.correction_calls(), 1);
        assert!(out
            .verified
            .iter()
            .all(|k| k.evidence.source_model.as_deref() == Some("qwen")));
        assert!(svc.prompts()[0].contains("exactly 2 KPIs"));
    }

    #[test]
    fn budget_exhaustion_keeps_valid_and_tags_the_rest() {
        let still_bad = serde_json::json!({ "kpis": [good(), bad()] }).to_string();
        let svc = ScriptedService::new("m").reply(still_bad);
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 2).run(&table(), vec![good(), bad()], &svc);
        assert_eq!(out.termination, Termination::IterationsExhausted);
        assert_eq!(svc.calls(), 1);
        assert_eq!(out.verified.len(), 1);
        assert_eq!(out.unresolved.len(), 1);
        assert_eq!(out.unresolved[0].reason, UnresolvedReason::BudgetExhausted);
    }

    #[test]
    fn malformed_reply_is_recovered_once() {
        let svc = ScriptedService::new("m").reply("I think the answer is").reply(fixed_reply());
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(&table(), vec![good(), bad()], &svc);
        assert!(out.is_all_valid());
        assert_eq!(svc.calls(), 2);
        let recovery = &svc.prompts()[1];
        assert!(recovery.contains("not valid JSON"));
        assert!(recovery.contains("with exactly 2 KPIs"));
    }

    #[test]
    fn failed_recovery_is_an_external_failure() {
        let svc = ScriptedService::new("m").reply("nope").reply("still nope");
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(&table(), vec![good(), bad()], &svc);
        assert!(matches!(
            out.failure(),
            Some(ExternalFailure::Unparsable {
                error: ResponseError::NoJson,
                ..
            })
        ));
        assert_eq!(out.verified.len(), 1);
        assert_eq!(out.unresolved[0].reason, UnresolvedReason::ExternalFailure);
    }

    #[test]
    fn service_errors_are_preserved_unchanged() {
        for error in [
            GenerationError::Timeout(Duration::from_secs(120)),
            GenerationError::ResourceExhausted("CUDA out of memory".into()),
            GenerationError::Transport("connection refused".into()),
        ] {
            let svc = ScriptedService::new("m").fail(error.clone());
            let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).run(&table(), vec![good(), bad()], &svc);
            assert_eq!(
                out.termination,
                Termination::ExternalFailure(ExternalFailure::Generation { error })
            );
            assert_eq!(out.verified.len(), 1);
            assert_eq!(out.rounds.len(), 1);
        }
    }

    #[test]
    fn extract_and_run_uses_initial_extraction() {
        let initial = serde_json::json!({ "kpis": [good(), bad()] }).to_string();
        let svc = ScriptedService::new("m")
            .reply(format!("<think>ok</think>```json\n{initial}\n```"))
            .reply(fixed_reply());
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).extract_and_run(&table(), &svc);
        assert!(out.is_all_valid());
        assert_eq!(svc.calls(), 2);
        assert!(svc.prompts()[0].contains("TABLE:"));
    }

    #[test]
    fn ensemble_runs_every_model_and_attributes_claims() {
        let initial = serde_json::json!({ "kpis": [good(), bad()] }).to_string();
        let services = vec![
            ScriptedService::new("qwen").reply(initial.clone()).reply(fixed_reply()),
            ScriptedService::new("llama").fail(GenerationError::Transport("down".into())),
            ScriptedService::new("mistral").reply(serde_json::json!({ "kpis": [good()] }).to_string()),
        ];
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).extract_ensemble(&table(), &services);

        assert_eq!(out.models_used, vec!["qwen", "llama", "mistral"]);
        assert_eq!(out.outcomes.len(), 3);
        assert!(out.outcome_for("qwen").unwrap().is_all_valid());
        assert!(out.outcome_for("llama").unwrap().failure().is_some());
        assert_eq!(out.verified.len(), 3);
        let models: Vec<_> = out
            .verified
            .iter()
            .map(|k| k.evidence.source_model.as_deref().unwrap())
            .collect();
        assert_eq!(models, vec!["qwen", "qwen", "mistral"]);
        assert_eq!(out.unresolved().count(), 0);
    }

    #[test]
    fn extract_and_run_reports_failed_extraction() {
        let svc = ScriptedService::new("m").fail(GenerationError::Transport("down".into()));
        let out = CorrectionOrchestrator::new(IndexValidator::default(), 3).extract_and_run(&table(), &svc);
        assert!(out.failure().is_some());
        assert!(out.rounds.is_empty());
        assert!(out.verified.is_empty());
    }
}
