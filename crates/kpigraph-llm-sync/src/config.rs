//! Runtime configuration.
//!
//! Every knob resolves with the same precedence:
//! 1) explicit override (CLI flag)
//! 2) environment variable
//! 3) built-in default

use kpigraph_core::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const KPIGRAPH_MAX_ITERATIONS_ENV: &str = "KPIGRAPH_MAX_ITERATIONS";
pub const KPIGRAPH_LLM_TIMEOUT_SECS_ENV: &str = "KPIGRAPH_LLM_TIMEOUT_SECS";
pub const KPIGRAPH_LLM_MAX_OUTPUT_TOKENS_ENV: &str = "KPIGRAPH_LLM_MAX_OUTPUT_TOKENS";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";

pub const DEFAULT_MAX_ITERATIONS: usize = 3;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_MAX_OUTPUT_TOKENS: usize = 4096;
// IPv4 loopback: `localhost` may resolve to ::1 while Ollama listens on IPv4 only.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}={value:?} ({expected})")]
    Invalid {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("failed to read {name}: {source}")]
    Unreadable {
        name: String,
        #[source]
        source: std::env::VarError,
    },
}

/// Read an env var; empty counts as unset.
pub fn env_string(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            Ok((!v.is_empty()).then(|| v.to_string()))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(ConfigError::Unreadable {
            name: name.to_string(),
            source,
        }),
    }
}

/// Integer env var clamped to `[min, max]`.
pub fn env_usize(name: &str, default: usize, min: usize, max: usize) -> Result<usize, ConfigError> {
    let Some(v) = env_string(name)? else {
        return Ok(default);
    };
    let parsed = v.parse::<usize>().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        value: v.clone(),
        expected: "expected integer",
    })?;
    Ok(parsed.clamp(min, max))
}

/// Resolve the generation timeout. `0` disables it.
pub fn llm_timeout(timeout_secs_override: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    let secs = match timeout_secs_override {
        Some(v) => v,
        None => match env_string(KPIGRAPH_LLM_TIMEOUT_SECS_ENV)? {
            Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: KPIGRAPH_LLM_TIMEOUT_SECS_ENV.to_string(),
                value: v.clone(),
                expected: "expected integer seconds; 0 disables",
            })?,
            None => DEFAULT_LLM_TIMEOUT_SECS,
        },
    };
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

pub fn max_iterations(override_value: Option<usize>) -> Result<usize, ConfigError> {
    match override_value {
        Some(v) => Ok(v),
        None => env_usize(KPIGRAPH_MAX_ITERATIONS_ENV, DEFAULT_MAX_ITERATIONS, 0, 100),
    }
}

pub fn max_output_tokens(override_value: Option<usize>) -> Result<usize, ConfigError> {
    match override_value {
        Some(v) => Ok(v),
        None => env_usize(
            KPIGRAPH_LLM_MAX_OUTPUT_TOKENS_ENV,
            DEFAULT_LLM_MAX_OUTPUT_TOKENS,
            64,
            131_072,
        ),
    }
}

pub fn ollama_host(override_value: Option<&str>) -> Result<String, ConfigError> {
    let host = match override_value {
        Some(h) => h.to_string(),
        None => env_string(OLLAMA_HOST_ENV)?.unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
    };
    Ok(normalize_http_base_url(&host, DEFAULT_OLLAMA_HOST))
}

pub fn openai_base_url(override_value: Option<&str>) -> Result<String, ConfigError> {
    let url = match override_value {
        Some(u) => u.to_string(),
        None => env_string(OPENAI_BASE_URL_ENV)?
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
    };
    Ok(normalize_http_base_url(&url, DEFAULT_OPENAI_BASE_URL))
}

pub fn openai_model(override_value: Option<&str>) -> Result<String, ConfigError> {
    match override_value {
        Some(m) => Ok(m.to_string()),
        None => Ok(env_string(OPENAI_MODEL_ENV)?.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string())),
    }
}

/// Add a scheme if missing and drop trailing slashes.
pub fn normalize_http_base_url(raw: &str, default: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return default.to_string();
    }
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

// ============================================================================
// Correction settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Correction rounds; `0` still performs one validation pass.
    pub max_iterations: usize,
    /// `None` waits forever.
    pub timeout_secs: Option<u64>,
    pub max_output_tokens: usize,
    pub validator: ValidatorConfig,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_secs: Some(DEFAULT_LLM_TIMEOUT_SECS),
            max_output_tokens: DEFAULT_LLM_MAX_OUTPUT_TOKENS,
            validator: ValidatorConfig::default(),
        }
    }
}

impl CorrectionConfig {
    /// Resolve from overrides and the environment.
    pub fn resolve(
        max_iterations_override: Option<usize>,
        timeout_secs_override: Option<u64>,
        max_output_tokens_override: Option<usize>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            max_iterations: max_iterations(max_iterations_override)?,
            timeout_secs: llm_timeout(timeout_secs_override)?.map(|d| d.as_secs()),
            max_output_tokens: max_output_tokens(max_output_tokens_override)?,
            validator: ValidatorConfig::default(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(None, None, None)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name so parallel tests do not race.

    #[test]
    fn env_usize_clamps_and_defaults() {
        let name = "KPIGRAPH_TEST_ENV_USIZE";
        std::env::remove_var(name);
        assert_eq!(env_usize(name, 3, 0, 10).unwrap(), 3);
        std::env::set_var(name, "  ");
        assert_eq!(env_usize(name, 3, 0, 10).unwrap(), 3);
        std::env::set_var(name, "50");
        assert_eq!(env_usize(name, 3, 0, 10).unwrap(), 10);
        std::env::set_var(name, "many");
        assert!(matches!(
            env_usize(name, 3, 0, 10),
            Err(ConfigError::Invalid { .. })
        ));
        std::env::remove_var(name);
    }

    #[test]
    fn explicit_timeout_wins_and_zero_disables() {
        assert_eq!(llm_timeout(Some(0)).unwrap(), None);
        assert_eq!(llm_timeout(Some(7)).unwrap(), Some(Duration::from_secs(7)));
        assert_eq!(max_iterations(Some(0)).unwrap(), 0);
    }

    #[test]
    fn base_urls_are_normalised() {
        assert_eq!(
            normalize_http_base_url("localhost:11434/", DEFAULT_OLLAMA_HOST),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_http_base_url("", DEFAULT_OPENAI_BASE_URL),
            DEFAULT_OPENAI_BASE_URL
        );
        assert_eq!(
            normalize_http_base_url("https://example.org/", DEFAULT_OPENAI_BASE_URL),
            "https://example.org"
        );
    }

    #[test]
    fn correction_config_round_trips_with_defaults() {
        let cfg: CorrectionConfig = serde_json::from_str(r#"{"max_iterations": 5}"#).unwrap();
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS)));
        assert_eq!(cfg.validator, ValidatorConfig::default());
    }
}
