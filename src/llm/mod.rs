//! LLM provider clients.
//!
//! A request names a model; [`client_for_model`] routes it to the matching
//! provider client the way the upstream vendors expect (OpenAI-compatible
//! chat completions, or an Ollama daemon's generate endpoint).

pub mod context;
mod ollama;
mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::config::LlmConfig;
use crate::error::PythiaError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::warn;

/// System prompt prefix when database context is attached.
pub const CONTEXT_PREAMBLE: &str = "You are an assistant with access to database information. \
     Use this database context to help answer questions: ";

/// System prompt when no context is attached.
pub const PLAIN_PREAMBLE: &str = "You are an assistant that helps answer questions.";

/// A streaming chat completion: each item is one content chunk.
pub type ChunkStream = BoxStream<'static, Result<String, PythiaError>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a streaming completion for `prompt`, optionally grounded in
    /// `context`. The returned stream yields content chunks; upstream
    /// request errors surface here, protocol errors mid-stream.
    async fn stream_completion(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<ChunkStream, PythiaError>;
}

impl std::fmt::Debug for dyn ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChatClient")
    }
}

/// Provider families a model name can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
    Unsupported,
}

/// Routes a model name to its provider by naming convention.
pub fn provider_for_model(model: &str) -> Provider {
    if model.starts_with("gpt")
        || model.starts_with("text-davinci")
        || model.starts_with("davinci")
    {
        Provider::OpenAi
    } else if model.starts_with("claude") {
        Provider::Unsupported
    } else if model.starts_with("mistral")
        || model.starts_with("llama")
        || model.starts_with("codellama")
    {
        Provider::Ollama
    } else {
        warn!("Unknown model: {model}, defaulting to OpenAI client");
        Provider::OpenAi
    }
}

/// Builds the provider client for `model` (falling back to the configured
/// default model when the request names none).
pub fn client_for_model(
    model: Option<&str>,
    cfg: &LlmConfig,
    http: reqwest::Client,
) -> Result<Box<dyn ChatClient>, PythiaError> {
    let model = model.unwrap_or(&cfg.default_model);
    match provider_for_model(model) {
        Provider::OpenAi => Ok(Box::new(OpenAiClient::new(http, &cfg.openai, model)?)),
        Provider::Ollama => Ok(Box::new(OllamaClient::new(http, &cfg.ollama, model))),
        Provider::Unsupported => Err(PythiaError::UnsupportedModel(model.to_string())),
    }
}

pub(crate) fn system_prompt(context: Option<&str>) -> String {
    match context {
        Some(ctx) => format!("{CONTEXT_PREAMBLE}{ctx}"),
        None => PLAIN_PREAMBLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    #[test]
    fn model_names_route_by_prefix() {
        assert_eq!(provider_for_model("gpt-3.5-turbo"), Provider::OpenAi);
        assert_eq!(provider_for_model("gpt-4"), Provider::OpenAi);
        assert_eq!(provider_for_model("text-davinci-003"), Provider::OpenAi);
        assert_eq!(provider_for_model("llama2:13b"), Provider::Ollama);
        assert_eq!(provider_for_model("mistral"), Provider::Ollama);
        assert_eq!(provider_for_model("codellama"), Provider::Ollama);
        assert_eq!(provider_for_model("claude-2"), Provider::Unsupported);
        // Unknown names fall back to the OpenAI-compatible client.
        assert_eq!(provider_for_model("something-else"), Provider::OpenAi);
    }

    #[test]
    fn claude_models_are_rejected() {
        let cfg = LlmConfig::default();
        let err = client_for_model(Some("claude-instant"), &cfg, reqwest::Client::new())
            .expect_err("claude is unsupported");
        assert!(matches!(err, PythiaError::UnsupportedModel(_)));
    }

    #[test]
    fn openai_without_key_is_not_configured() {
        let cfg = LlmConfig::default();
        let err = client_for_model(None, &cfg, reqwest::Client::new())
            .expect_err("no API key configured");
        assert!(matches!(err, PythiaError::LlmNotConfigured(_)));
    }

    #[test]
    fn system_prompt_embeds_context() {
        assert_eq!(system_prompt(None), PLAIN_PREAMBLE);
        let with_ctx = system_prompt(Some("Table: users"));
        assert!(with_ctx.starts_with(CONTEXT_PREAMBLE));
        assert!(with_ctx.ends_with("Table: users"));
    }
}
