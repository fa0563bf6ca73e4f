//! OpenAI-compatible chat-completions client.
//!
//! Streaming responses arrive as SSE; each event's `choices[0].delta.content`
//! is one content chunk, `[DONE]` terminates the stream.

use crate::config::OpenAiConfig;
use crate::error::PythiaError;
use crate::llm::{ChatClient, ChunkStream, system_prompt};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use eventsource_stream::Eventsource;
use futures::{StreamExt, future};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};
use url::Url;

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    api_url: Url,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        http: reqwest::Client,
        cfg: &OpenAiConfig,
        model: &str,
    ) -> Result<Self, PythiaError> {
        if cfg.api_key.is_empty() {
            return Err(PythiaError::LlmNotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            api_url: cfg.api_url.clone(),
            model: model.to_string(),
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, PythiaError> {
        let resp = (|| async {
            let resp = self
                .http
                .post(self.api_url.clone())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await?;
            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status().unwrap_err();
                error!("OpenAI server error (will retry): {status}");
                return Err(err);
            }
            Ok(resp)
        })
        .retry(ExponentialBuilder::default())
        .await?;

        Ok(resp.error_for_status()?)
    }
}

/// Chat-completions request payload.
pub(crate) fn chat_payload(
    model: &str,
    prompt: &str,
    context: Option<&str>,
    stream: bool,
) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt(context) },
            { "role": "user", "content": prompt },
        ],
        "stream": stream,
    })
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extracts the content chunk from one SSE event payload, skipping events
/// that carry none (role deltas, finish markers, malformed JSON).
pub(crate) fn parse_stream_data(data: &str) -> Option<String> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty()),
        Err(err) => {
            warn!("Error parsing SSE event ({err}): {:.80}", data);
            None
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn stream_completion(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<ChunkStream, PythiaError> {
        let body = chat_payload(&self.model, prompt, context, true);
        let resp = self.post(&body).await?;

        let stream = resp
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(ev) if ev.data == "[DONE]"))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(ev) => parse_stream_data(&ev.data).map(Ok),
                    Err(err) => Some(Err(PythiaError::StreamProtocol(err.to_string()))),
                })
            })
            .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_context_and_stream_flag() {
        let body = chat_payload("gpt-4", "how many users?", Some("Table: users"), true);
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(
            body["messages"][0]["content"]
                .as_str()
                .expect("system content")
                .contains("Table: users")
        );
        assert_eq!(body["messages"][1]["content"], "how many users?");

        let plain = chat_payload("gpt-4", "hi", None, false);
        assert_eq!(plain["stream"], false);
        assert_eq!(
            plain["messages"][0]["content"],
            crate::llm::PLAIN_PREAMBLE
        );
    }

    #[test]
    fn delta_content_is_extracted() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_stream_data(data), Some("Hel".to_string()));
    }

    #[test]
    fn empty_and_malformed_events_are_skipped() {
        assert_eq!(parse_stream_data(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(
            parse_stream_data(r#"{"choices":[{"delta":{"content":""}}]}"#),
            None
        );
        assert_eq!(parse_stream_data(r#"{"choices":[]}"#), None);
        assert_eq!(parse_stream_data("not json"), None);
    }
}
