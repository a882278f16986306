use super::GenerationService;
use crate::error::GenerationError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Any OpenAI-compatible `/v1/chat/completions` endpoint (OpenAI, vLLM,
/// llama.cpp server, ...).
#[derive(Debug, Clone)]
pub struct OpenAiService {
    url: String,
    api_key: String,
    model: String,
    max_output_tokens: usize,
    timeout: Option<Duration>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiService {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Option<Duration>,
        max_output_tokens: usize,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::NotConfigured(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GenerationError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            url: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            max_output_tokens,
            timeout,
            client,
        })
    }
}

impl GenerationService for OpenAiService {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0,
            "max_tokens": self.max_output_tokens,
        });

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout.unwrap_or_default())
                } else {
                    GenerationError::Transport(format!("failed to reach {}: {e}", self.url))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(GenerationError::ResourceExhausted(text));
            }
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CompletionResponse = resp
            .json()
            .map_err(|e| GenerationError::Backend(format!("chat completion returned invalid JSON: {e}")))?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(GenerationError::Backend(
                "chat completion returned no choices".to_string(),
            ));
        };
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(model = %self.model, "completion hit the output token limit");
        }
        Ok(choice.message.content.unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
