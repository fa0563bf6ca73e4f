use serde::{Deserialize, Serialize};
use url::Url;

/// LLM provider configuration (`llm` table in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Model used when a request does not name one.
    /// TOML: `llm.default_model`. Default: `gpt-3.5-turbo`.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Maximum rows of sample data included per table in the LLM context.
    /// TOML: `llm.sample_rows`. Default: `5`.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: i64,

    /// OpenAI-compatible provider settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Ollama provider settings.
    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            sample_rows: default_sample_rows(),
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    /// Bearer key for the chat-completions endpoint. The `OPENAI_API_KEY` or
    /// `LLM_API_KEY` environment variables fill this when the TOML leaves it empty.
    #[serde(default)]
    pub api_key: String,

    /// Chat-completions endpoint.
    /// TOML: `llm.openai.api_url`.
    #[serde(default = "default_openai_url")]
    pub api_url: Url,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_openai_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Generate endpoint of a local or remote Ollama daemon.
    /// TOML: `llm.ollama.api_url`.
    #[serde(default = "default_ollama_url")]
    pub api_url: Url,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            api_url: default_ollama_url(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_sample_rows() -> i64 {
    5
}

fn default_openai_url() -> Url {
    Url::parse("https://api.openai.com/v1/chat/completions").expect("static URL parses")
}

fn default_ollama_url() -> Url {
    Url::parse("http://localhost:11434/api/generate").expect("static URL parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_known_endpoints() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.default_model, "gpt-3.5-turbo");
        assert_eq!(cfg.sample_rows, 5);
        assert_eq!(
            cfg.openai.api_url.as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(cfg.ollama.api_url.as_str(), "http://localhost:11434/api/generate");
    }
}
