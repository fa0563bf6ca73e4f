//! Ollama generate-endpoint client.
//!
//! Streaming responses are NDJSON: one JSON object per line, each carrying a
//! `response` fragment, with `done: true` on the final line.

use crate::config::OllamaConfig;
use crate::error::PythiaError;
use crate::llm::{ChatClient, ChunkStream, system_prompt};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::{StreamExt, future, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};
use url::Url;

pub struct OllamaClient {
    http: reqwest::Client,
    api_url: Url,
    model: String,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, cfg: &OllamaConfig, model: &str) -> Self {
        Self {
            http,
            api_url: cfg.api_url.clone(),
            model: model.to_string(),
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, PythiaError> {
        let resp = (|| async {
            let resp = self
                .http
                .post(self.api_url.clone())
                .json(body)
                .send()
                .await?;
            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status().unwrap_err();
                error!("Ollama server error (will retry): {status}");
                return Err(err);
            }
            Ok(resp)
        })
        .retry(ExponentialBuilder::default())
        .await?;

        Ok(resp.error_for_status()?)
    }
}

/// Generate-endpoint request payload.
pub(crate) fn generate_payload(
    model: &str,
    prompt: &str,
    context: Option<&str>,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "prompt": prompt,
        "stream": stream,
    });
    if context.is_some() {
        body["system"] = Value::String(system_prompt(context));
    }
    body
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

/// One parsed NDJSON line: an optional content fragment and the done flag.
pub(crate) fn parse_line(line: &str) -> (Option<String>, bool) {
    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(chunk) => (
            chunk.response.filter(|r| !r.is_empty()),
            chunk.done,
        ),
        Err(err) => {
            warn!("Error parsing Ollama response line ({err}): {:.80}", line);
            (None, false)
        }
    }
}

struct LineBuffer {
    buf: Vec<u8>,
    done: bool,
}

/// Parses one buffered line; returns the done flag. The buffer holds raw
/// bytes until a full line is present, so a multi-byte character split across
/// network chunks is never decoded early.
pub(crate) fn flush_line(line: &[u8], out: &mut Vec<Result<String, PythiaError>>) -> bool {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    let (fragment, done) = parse_line(line);
    if let Some(fragment) = fragment {
        out.push(Ok(fragment));
    }
    done
}

/// Drains every complete line from the buffer; returns true when a line was
/// flagged done.
pub(crate) fn drain_lines(buf: &mut Vec<u8>, out: &mut Vec<Result<String, PythiaError>>) -> bool {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        if flush_line(&line, out) {
            return true;
        }
    }
    false
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_completion(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<ChunkStream, PythiaError> {
        let body = generate_payload(&self.model, prompt, context, true);
        let resp = self.post(&body).await?;

        // Reassemble NDJSON lines across network chunk boundaries, stop at
        // the first line flagged done. A trailing `None` marks the end of the
        // body so a last line without a newline still gets parsed.
        let state = LineBuffer {
            buf: Vec::new(),
            done: false,
        };
        let stream = resp
            .bytes_stream()
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(state, |state, item| {
                if state.done {
                    return future::ready(None);
                }
                let mut out: Vec<Result<String, PythiaError>> = Vec::new();
                match item {
                    None => {
                        let rest = std::mem::take(&mut state.buf);
                        flush_line(&rest, &mut out);
                        state.done = true;
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        out.push(Err(PythiaError::Upstream(err)));
                    }
                    Some(Ok(bytes)) => {
                        state.buf.extend_from_slice(&bytes);
                        if drain_lines(&mut state.buf, &mut out) {
                            state.done = true;
                        }
                    }
                }
                future::ready(Some(stream::iter(out)))
            })
            .flatten()
            .boxed();

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_sets_system_only_with_context() {
        let body = generate_payload("llama2", "hello", Some("Table: users"), true);
        assert_eq!(body["model"], "llama2");
        assert_eq!(body["stream"], true);
        assert!(
            body["system"]
                .as_str()
                .expect("system prompt")
                .contains("Table: users")
        );

        let plain = generate_payload("llama2", "hello", None, false);
        assert!(plain.get("system").is_none());
        assert_eq!(plain["stream"], false);
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        // "café" with the 0xC3 0xA9 of 'é' split across two network chunks.
        let mut buf = Vec::new();
        let mut out = Vec::new();

        buf.extend_from_slice(b"{\"response\":\"caf\xc3");
        assert!(!drain_lines(&mut buf, &mut out));
        assert!(out.is_empty());

        buf.extend_from_slice(b"\xa9\",\"done\":false}\n");
        assert!(!drain_lines(&mut buf, &mut out));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().expect("fragment"), "caf\u{e9}");
        assert!(buf.is_empty());
    }

    #[test]
    fn final_line_without_newline_is_flushed() {
        let mut out = Vec::new();
        let done = flush_line(b"{\"response\":\"tail\",\"done\":true}", &mut out);
        assert!(done);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().expect("fragment"), "tail");
    }

    #[test]
    fn lines_parse_into_fragments() {
        assert_eq!(
            parse_line(r#"{"response":"Hi","done":false}"#),
            (Some("Hi".to_string()), false)
        );
        assert_eq!(parse_line(r#"{"response":"","done":true}"#), (None, true));
        assert_eq!(parse_line(r#"{"done":true}"#), (None, true));
        assert_eq!(parse_line("garbage"), (None, false));
    }
}
