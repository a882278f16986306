//! Correction loop between KPI claims and a text-generation service.
//!
//! ```text
//!   SourceTable + claims
//!          │
//!          ▼
//!   CorrectionOrchestrator ──prompt──► GenerationService (ollama, openai,
//!          │  ▲                               command, replay)
//!          │  └──────────cleaned JSON─────────┘
//!          ▼
//!   TableOutcome { verified, unresolved, rounds, termination }
//! ```
//!
//! The validator lives in `kpigraph-core`; this crate owns prompts, response
//! cleaning, backend plumbing and the iteration budget.

pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod response;

pub use config::{ConfigError, CorrectionConfig};
pub use error::{ExternalFailure, GenerationError, ResponseError};
pub use llm::{CommandService, DeadlineService, GenerationService, LlmBackend, ScriptedService};
#[cfg(feature = "llm-ollama")]
pub use llm::OllamaService;
#[cfg(feature = "llm-openai")]
pub use llm::OpenAiService;
pub use orchestrator::{
    CorrectionOrchestrator, EnsembleOutcome, RoundReport, TableOutcome, Termination,
    UnresolvedClaim, UnresolvedReason,
};
pub use prompts::{correction_prompt, extraction_prompt, recovery_prompt};
pub use response::{clean_response, decode_claims, parse_claim_set, repair_truncated_json};
