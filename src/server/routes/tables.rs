//! Generic table CRUD over the reflected schema.

use crate::db::reflect::{SchemaSnapshot, TableInfo, reflect};
use crate::db::rows::{
    ExecOutcome, delete_row as db_delete_row, execute_raw, insert_row, select_rows,
    update_row as db_update_row,
};
use crate::error::PythiaError;
use crate::server::router::AppState;
use crate::server::routes::{success, success_message};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

fn lookup<'a>(
    snapshot: &'a Arc<SchemaSnapshot>,
    table: &str,
) -> Result<&'a TableInfo, PythiaError> {
    snapshot
        .table(table)
        .ok_or_else(|| PythiaError::TableNotFound(table.to_string()))
}

fn require_object(body: &Value) -> Result<&Map<String, Value>, PythiaError> {
    body.as_object()
        .filter(|map| !map.is_empty())
        .ok_or_else(|| PythiaError::InvalidRequest("No data provided".to_string()))
}

/// `GET /api/tables` — names of all reflected tables.
pub async fn list_tables(State(state): State<AppState>) -> Result<Json<Value>, PythiaError> {
    let snapshot = state.snapshot().await;
    Ok(success(json!({ "tables": snapshot.table_names() })))
}

/// `GET /api/tables/{table}` — columns, primary keys, and foreign keys.
pub async fn table_details(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<Value>, PythiaError> {
    let snapshot = state.snapshot().await;
    let info = lookup(&snapshot, &table)?;
    Ok(success(serde_json::to_value(info)?))
}

/// `POST /api/schema/refresh` — re-reflect the catalog and publish the new
/// snapshot.
pub async fn refresh_schema(State(state): State<AppState>) -> Result<Json<Value>, PythiaError> {
    let snapshot = reflect(&state.pool).await?;
    let names = snapshot.table_names();
    info!("Schema refreshed: {} tables", names.len());
    state.install_snapshot(snapshot).await;
    Ok(success(json!({ "tables": names })))
}

#[derive(Deserialize)]
pub struct RowsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// `GET /api/tables/{table}/rows?limit=&offset=` — page of rows.
pub async fn list_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(page): Query<RowsQuery>,
) -> Result<Json<Value>, PythiaError> {
    if page.limit < 0 || page.offset < 0 {
        return Err(PythiaError::InvalidRequest(
            "limit and offset must be non-negative".to_string(),
        ));
    }
    let snapshot = state.snapshot().await;
    let info = lookup(&snapshot, &table)?;

    let rows = select_rows(&state.pool, info, page.limit, page.offset).await?;
    let count = rows.len();
    Ok(success(json!({
        "rows": rows,
        "count": count,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// `POST /api/tables/{table}/rows` — insert a row from a JSON object.
pub async fn create_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, PythiaError> {
    let snapshot = state.snapshot().await;
    let info = lookup(&snapshot, &table)?;
    let data = require_object(&body)?;

    let row = insert_row(&state.pool, info, data).await?;
    Ok((StatusCode::CREATED, success(json!({ "row": row }))))
}

/// `PUT /api/tables/{table}/rows/{id}` — update by first primary key.
pub async fn update_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, PythiaError> {
    let snapshot = state.snapshot().await;
    let info = lookup(&snapshot, &table)?;
    let data = require_object(&body)?;

    let pk = info
        .primary_key()
        .ok_or_else(|| PythiaError::NoPrimaryKey(table.clone()))?
        .to_string();
    match db_update_row(&state.pool, info, data, &id).await? {
        Some(row) => Ok(success(json!({ "row": row }))),
        None => Err(PythiaError::RowNotFound { pk, id }),
    }
}

/// `DELETE /api/tables/{table}/rows/{id}` — delete by first primary key.
pub async fn delete_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Value>, PythiaError> {
    let snapshot = state.snapshot().await;
    let info = lookup(&snapshot, &table)?;
    let pk = info
        .primary_key()
        .ok_or_else(|| PythiaError::NoPrimaryKey(table.clone()))?
        .to_string();

    if db_delete_row(&state.pool, info, &id).await? {
        Ok(success_message(format!(
            "Row with {pk}={id} deleted successfully"
        )))
    } else {
        Err(PythiaError::RowNotFound { pk, id })
    }
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// `POST /api/execute` — raw SQL with optional positional text parameters.
/// Reached only through the key guard.
pub async fn execute_sql(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<Value>, PythiaError> {
    if req.query.trim().is_empty() {
        return Err(PythiaError::InvalidRequest(
            "Query not provided".to_string(),
        ));
    }

    match execute_raw(&state.pool, &req.query, &req.params).await? {
        ExecOutcome::Rows(rows) => {
            let count = rows.len();
            Ok(success(json!({ "rows": rows, "count": count })))
        }
        ExecOutcome::Affected(n) => Ok(Json(json!({
            "status": "success",
            "message": "Query executed successfully",
            "rows_affected": n,
        }))),
    }
}
