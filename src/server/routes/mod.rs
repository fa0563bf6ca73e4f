pub mod meta;
pub mod sse;
pub mod tables;

use axum::Json;
use serde_json::{Value, json};

/// Success envelope, `{"status":"success","data":...}`.
pub(crate) fn success(data: Value) -> Json<Value> {
    Json(json!({ "status": "success", "data": data }))
}

/// Success envelope carrying a human message instead of data.
pub(crate) fn success_message(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "status": "success", "message": message.into() }))
}
