//! SSE endpoint streaming schema-grounded LLM completions.
//!
//! Event sequence on the wire: `{"status":"started"}`, one `{"chunk":...}`
//! per upstream content fragment, `{"status":"completed"}`, then a final
//! event of type `close` carrying `{"status":"closed"}`. A mid-stream
//! upstream failure replaces the tail with `{"error":...}` followed by the
//! close event.

use crate::error::PythiaError;
use crate::llm::{client_for_model, context::build_context};
use crate::server::router::AppState;
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::{StreamExt, once};
use tracing::{error, warn};

#[derive(Deserialize)]
pub struct LlmStreamRequest {
    /// The user's question about the database.
    #[serde(default)]
    pub prompt: String,

    /// Optional tables to enrich the context with row counts and samples.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Optional model override; the configured default applies otherwise.
    #[serde(default)]
    pub model: Option<String>,
}

fn message_event(data: &Value) -> Event {
    Event::default().data(data.to_string())
}

fn close_event() -> Event {
    Event::default()
        .event("close")
        .data(json!({ "status": "closed" }).to_string())
}

enum StreamItem {
    Chunk(String),
    Done,
}

/// `POST /sse/llm` — stream an LLM answer grounded in the reflected schema.
pub async fn stream_llm(
    State(state): State<AppState>,
    Json(req): Json<LlmStreamRequest>,
) -> Result<impl IntoResponse, PythiaError> {
    if req.prompt.trim().is_empty() {
        return Err(PythiaError::InvalidRequest("Prompt is required".to_string()));
    }

    let snapshot = state.snapshot().await;
    let context = build_context(
        &state.pool,
        &snapshot,
        &req.prompt,
        &req.tables,
        state.llm.sample_rows,
    )
    .await;

    let client = client_for_model(req.model.as_deref(), &state.llm, state.http.clone())?;
    let chunks = client
        .stream_completion(&req.prompt, Some(context.as_str()))
        .await?;

    // Append a completion marker so the happy path can emit its terminal
    // event from inside the same pipeline; on error the marker is dropped.
    let source = chunks
        .map(|item| item.map(StreamItem::Chunk))
        .chain(once(Ok(StreamItem::Done)));

    let mut failed = false;
    let events = source
        .timeout(Duration::from_secs(60))
        .map_while(move |item| {
            if failed {
                return None;
            }
            let event = match item {
                Ok(Ok(StreamItem::Chunk(chunk))) => message_event(&json!({ "chunk": chunk })),
                Ok(Ok(StreamItem::Done)) => message_event(&json!({ "status": "completed" })),
                Ok(Err(err)) => {
                    failed = true;
                    warn!("Error in LLM streaming: {err}");
                    message_event(&json!({ "error": err.to_string() }))
                }
                Err(_elapsed) => {
                    failed = true;
                    error!("Upstream LLM stream timed out (idle > 60s)");
                    message_event(&json!({ "error": "Stream idle timeout" }))
                }
            };
            Some(event)
        });

    let all = once(message_event(&json!({ "status": "started" })))
        .chain(events)
        .chain(once(close_event()))
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(all).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_fields_default() {
        let req: LlmStreamRequest =
            serde_json::from_str(r#"{"prompt":"how many users?"}"#).expect("deserializes");
        assert_eq!(req.prompt, "how many users?");
        assert!(req.tables.is_empty());
        assert!(req.model.is_none());

        let full: LlmStreamRequest = serde_json::from_str(
            r#"{"prompt":"p","tables":["users"],"model":"llama2"}"#,
        )
        .expect("deserializes");
        assert_eq!(full.tables, vec!["users"]);
        assert_eq!(full.model.as_deref(), Some("llama2"));
    }
}
