//! Text-generation backends.
//!
//! The orchestrator only needs `prompt -> text`. Everything model-specific
//! (HTTP APIs, local processes, recorded replays) lives behind
//! [`GenerationService`].

mod command;
mod deadline;
#[cfg(feature = "llm-ollama")]
mod ollama;
#[cfg(feature = "llm-openai")]
mod openai;
mod replay;

pub use command::CommandService;
pub use deadline::DeadlineService;
#[cfg(feature = "llm-ollama")]
pub use ollama::OllamaService;
#[cfg(feature = "llm-openai")]
pub use openai::OpenAiService;
pub use replay::ScriptedService;

use crate::error::GenerationError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// `prompt -> text`. Implementations must be shareable across threads.
pub trait GenerationService: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Stamped on claims this service produces.
    fn model_name(&self) -> &str;
}

impl<T: GenerationService + ?Sized> GenerationService for Arc<T> {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

impl<T: GenerationService + ?Sized> GenerationService for Box<T> {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// Replays recorded responses from a JSON array file; for tests and
    /// offline reruns.
    Replay { path: PathBuf },
    /// External process: prompt on stdin, generated text on stdout.
    Command {
        program: PathBuf,
        args: Vec<String>,
    },
    /// Local Ollama server via `/api/chat`.
    #[cfg(feature = "llm-ollama")]
    Ollama { host: String, model: String },
    /// OpenAI-compatible `/v1/chat/completions`.
    #[cfg(feature = "llm-openai")]
    OpenAI {
        base_url: String,
        api_key: String,
        model: String,
    },
}

impl LlmBackend {
    /// Instantiate the backend. Network backends get the timeout on their
    /// HTTP client; every backend is additionally wrapped in a
    /// [`DeadlineService`].
    #[cfg_attr(
        not(any(feature = "llm-ollama", feature = "llm-openai")),
        allow(unused_variables)
    )]
    pub fn build(
        &self,
        timeout: Option<Duration>,
        max_output_tokens: usize,
    ) -> Result<Arc<dyn GenerationService>, GenerationError> {
        let inner: Arc<dyn GenerationService> = match self {
            LlmBackend::Replay { path } => Arc::new(ScriptedService::from_file(path)?),
            LlmBackend::Command { program, args } => {
                Arc::new(CommandService::new(program.clone(), args.clone(), timeout))
            }
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host, model } => Arc::new(OllamaService::new(
                host.clone(),
                model.clone(),
                timeout,
                max_output_tokens,
            )?),
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI {
                base_url,
                api_key,
                model,
            } => Arc::new(OpenAiService::new(
                base_url.clone(),
                api_key.clone(),
                model.clone(),
                timeout,
                max_output_tokens,
            )?),
        };
        Ok(Arc::new(DeadlineService::new(inner, timeout)))
    }

    /// Replies are consumed in call order, so concurrent tables would take
    /// each other's recorded answers.
    pub fn is_order_sensitive(&self) -> bool {
        matches!(self, LlmBackend::Replay { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            LlmBackend::Replay { path } => format!("replay({})", path.display()),
            LlmBackend::Command { program, .. } => format!("command({})", program.display()),
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host, model } => format!("ollama({model} @ {host})"),
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI {
                base_url, model, ..
            } => format!("openai({model} @ {base_url})"),
        }
    }
}
