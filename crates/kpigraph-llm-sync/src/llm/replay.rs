use super::GenerationService;
use crate::error::GenerationError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;

/// Plays back a fixed sequence of responses and records every prompt.
///
/// Once the script runs out, further calls fail with a backend error.
pub struct ScriptedService {
    model: String,
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, error: GenerationError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Load a JSON array of response strings.
    pub fn from_file(path: &Path) -> Result<Self, GenerationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GenerationError::NotConfigured(format!("cannot read replay file {}: {e}", path.display()))
        })?;
        let responses: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            GenerationError::NotConfigured(format!(
                "replay file {} must be a JSON array of strings: {e}",
                path.display()
            ))
        })?;
        let model = path
            .file_stem()
            .map(|s| format!("replay:{}", s.to_string_lossy()))
            .unwrap_or_else(|| "replay".to_string());
        Ok(responses
            .into_iter()
            .fold(Self::new(model), |svc, r| svc.reply(r)))
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl GenerationService for ScriptedService {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        self.script.lock().pop_front().unwrap_or_else(|| {
            Err(GenerationError::Backend(
                "replay script exhausted".to_string(),
            ))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn plays_back_in_order_then_fails() {
        let svc = ScriptedService::new("script")
            .reply("one")
            .fail(GenerationError::ResourceExhausted("oom".into()));
        assert_eq!(svc.generate("a").unwrap(), "one");
        assert!(matches!(
            svc.generate("b"),
            Err(GenerationError::ResourceExhausted(_))
        ));
        assert!(matches!(svc.generate("c"), Err(GenerationError::Backend(_))));
        assert_eq!(svc.prompts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn loads_replay_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("qwen-run.json");
        std::fs::write(&path, r#"["{\"kpis\": []}", "second"]"#).unwrap();
        let svc = ScriptedService::from_file(&path).unwrap();
        assert_eq!(svc.model_name(), "replay:qwen-run");
        assert_eq!(svc.remaining(), 2);

        std::fs::write(&path, r#"{"not": "a list"}"#).unwrap();
        assert!(matches!(
            ScriptedService::from_file(&path),
            Err(GenerationError::NotConfigured(_))
        ));
    }
}
