use axum::Json;
use serde_json::{Value, json};

/// Service index: name, version, and the entry points.
pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "Pythia",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "A PostgreSQL CRUD gateway with schema-aware LLM streaming",
        "endpoints": {
            "api": "/api/tables",
            "sse": "/sse/llm",
        },
    }))
}
