use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A generation call that did not produce text.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("generation timed out after {}s (set KPIGRAPH_LLM_TIMEOUT_SECS=0 to disable)", .0.as_secs())]
    Timeout(Duration),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Classify a backend error body, recognising out-of-memory reports.
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("out of memory") || lower.contains("oom") || lower.contains("cuda error")
        {
            GenerationError::ResourceExhausted(message)
        } else {
            GenerationError::Backend(message)
        }
    }
}

/// Generated text that does not decode into a claim set.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResponseError {
    #[error("response contains no JSON object")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("JSON object has no \"kpis\" array")]
    MissingKpis,
}

/// Why a table's correction run stopped early.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalFailure {
    #[error("generation service failed: {error}")]
    Generation { error: GenerationError },

    #[error("response unparsable after recovery: {error}")]
    Unparsable {
        error: ResponseError,
        preview: String,
    },
}

impl From<GenerationError> for ExternalFailure {
    fn from(error: GenerationError) -> Self {
        ExternalFailure::Generation { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oom_messages_are_resource_exhaustion() {
        assert!(matches!(
            GenerationError::from_backend_message("CUDA error: out of memory"),
            GenerationError::ResourceExhausted(_)
        ));
        assert!(matches!(
            GenerationError::from_backend_message("model not found"),
            GenerationError::Backend(_)
        ));
    }

    #[test]
    fn timeout_message_mentions_the_switch() {
        let msg = GenerationError::Timeout(Duration::from_secs(5)).to_string();
        assert!(msg.contains("5s"));
        assert!(msg.contains("KPIGRAPH_LLM_TIMEOUT_SECS"));
    }
}
