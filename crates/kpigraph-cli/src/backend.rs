//! `--backend ...` flags → `LlmBackend`s.
//!
//! Repeating `--backend` builds an ensemble. `--model` values are handed out
//! in order to the ollama/openai members and `--replay` values to the replay
//! members; a single `--backend` with several of its values repeats that
//! backend once per value.

use anyhow::{anyhow, bail, Result};
use clap::{Args, ValueEnum};
use kpigraph_llm_sync::config;
use kpigraph_llm_sync::LlmBackend;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Ollama,
    Openai,
    Command,
    Replay,
}

#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Generation backend (repeatable for an ensemble)
    #[arg(long = "backend", value_enum, default_values_t = [BackendKind::Ollama])]
    pub backends: Vec<BackendKind>,

    /// Model name, repeatable (ollama: required; openai: defaults to $OPENAI_MODEL)
    #[arg(long = "model")]
    pub models: Vec<String>,

    /// Ollama host (defaults to $OLLAMA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// OpenAI-compatible base URL (defaults to $OPENAI_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Program for `--backend command` (prompt on stdin, reply on stdout)
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Extra argument for the command backend (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// JSON array of recorded replies for `--backend replay` (repeatable)
    #[arg(long = "replay")]
    pub replays: Vec<PathBuf>,
}

impl BackendArgs {
    /// One backend per ensemble member, in flag order.
    pub fn resolve_all(&self) -> Result<Vec<LlmBackend>> {
        let kinds = match self.backends.as_slice() {
            [] => vec![BackendKind::Ollama],
            [kind] => vec![*kind; self.values_for(*kind).max(1)],
            many => many.to_vec(),
        };
        let mut models = self.models.iter();
        let mut replays = self.replays.iter();
        let members = kinds
            .into_iter()
            .map(|kind| match kind {
                BackendKind::Replay => replay(replays.next()),
                BackendKind::Command => self.command(),
                BackendKind::Ollama => self.ollama(models.next()),
                BackendKind::Openai => self.openai(models.next()),
            })
            .collect::<Result<Vec<_>>>()?;
        if models.next().is_some() || replays.next().is_some() {
            bail!("more --model/--replay values than backends that use them");
        }
        Ok(members)
    }

    fn values_for(&self, kind: BackendKind) -> usize {
        match kind {
            BackendKind::Replay => self.replays.len(),
            BackendKind::Ollama | BackendKind::Openai => self.models.len(),
            BackendKind::Command => 1,
        }
    }

    fn command(&self) -> Result<LlmBackend> {
        let program = self
            .program
            .clone()
            .ok_or_else(|| anyhow!("--backend command requires --program <path>"))?;
        Ok(LlmBackend::Command {
            program,
            args: self.args.clone(),
        })
    }

    #[cfg(feature = "llm-ollama")]
    fn ollama(&self, model: Option<&String>) -> Result<LlmBackend> {
        let model = model
            .cloned()
            .ok_or_else(|| anyhow!("--backend ollama requires --model (e.g. qwen2.5:14b)"))?;
        Ok(LlmBackend::Ollama {
            host: config::ollama_host(self.host.as_deref())?,
            model,
        })
    }

    #[cfg(not(feature = "llm-ollama"))]
    fn ollama(&self, _model: Option<&String>) -> Result<LlmBackend> {
        Err(anyhow!("ollama support not compiled in (enable feature `llm-ollama`)"))
    }

    #[cfg(feature = "llm-openai")]
    fn openai(&self, model: Option<&String>) -> Result<LlmBackend> {
        let api_key = config::env_string(config::OPENAI_API_KEY_ENV)?
            .ok_or_else(|| anyhow!("--backend openai requires {}", config::OPENAI_API_KEY_ENV))?;
        Ok(LlmBackend::OpenAI {
            base_url: config::openai_base_url(self.base_url.as_deref())?,
            api_key,
            model: config::openai_model(model.map(String::as_str))?,
        })
    }

    #[cfg(not(feature = "llm-openai"))]
    fn openai(&self, _model: Option<&String>) -> Result<LlmBackend> {
        Err(anyhow!("openai support not compiled in (enable feature `llm-openai`)"))
    }
}

fn replay(path: Option<&PathBuf>) -> Result<LlmBackend> {
    let path = path
        .cloned()
        .ok_or_else(|| anyhow!("--backend replay requires --replay <file>"))?;
    Ok(LlmBackend::Replay { path })
}
