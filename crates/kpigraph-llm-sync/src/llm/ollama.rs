use super::GenerationService;
use crate::error::GenerationError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Local Ollama server, native `/api/chat` endpoint, non-streaming.
#[derive(Debug, Clone)]
pub struct OllamaService {
    url: String,
    model: String,
    max_output_tokens: usize,
    timeout: Option<Duration>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaService {
    pub fn new(
        host: String,
        model: String,
        timeout: Option<Duration>,
        max_output_tokens: usize,
    ) -> Result<Self, GenerationError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: format!("{}/api/chat", host.trim_end_matches('/')),
            model,
            max_output_tokens,
            timeout,
            client,
        })
    }
}

impl GenerationService for OllamaService {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [{ "role": "user", "content": prompt }],
            "options": {
                "temperature": 0,
                "num_predict": self.max_output_tokens,
            }
        });

        let resp = self.client.post(&self.url).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout.unwrap_or_default())
            } else {
                GenerationError::Transport(format!(
                    "failed to reach ollama at {} (is it running?) ({e}). Try: `ollama serve` or set OLLAMA_HOST",
                    self.url
                ))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            if status.as_u16() == 500 {
                return Err(GenerationError::from_backend_message(text));
            }
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| GenerationError::Backend(format!("ollama /api/chat returned invalid JSON: {e}")))?;
        Ok(parsed.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
