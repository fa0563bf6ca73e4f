//! Generic row access over reflected tables.
//!
//! SQL text is assembled from identifiers that were validated against the
//! reflected snapshot and quoted; every value travels as a bound text
//! parameter cast server-side to the column's reflected type. Result rows are
//! materialized by Postgres itself via `row_to_json(..)::jsonb`, so no
//! per-type Rust decoding of arbitrary columns is needed.

use crate::db::reflect::{ColumnInfo, TableInfo};
use crate::error::PythiaError;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

/// Double-quotes an identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Text form of a JSON value for binding; `None` binds SQL NULL.
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Arrays and objects bind as their JSON text; the CAST handles
        // json/jsonb columns and Postgres array literals are passed through.
        other => Some(other.to_string()),
    }
}

fn cast_expr(placeholder: usize, column: &ColumnInfo) -> String {
    format!("CAST(${placeholder} AS {})", quote_ident(&column.udt_name))
}

/// A built statement: SQL text plus its text-bound parameters, in order.
#[derive(Debug, PartialEq)]
pub struct BuiltStatement {
    pub sql: String,
    pub binds: Vec<Option<String>>,
}

fn require_columns<'a>(
    table: &'a TableInfo,
    data: &'a Map<String, Value>,
) -> Result<Vec<(&'a ColumnInfo, &'a Value)>, PythiaError> {
    data.iter()
        .map(|(name, value)| {
            table
                .column(name)
                .map(|col| (col, value))
                .ok_or_else(|| PythiaError::UnknownColumn {
                    table: table.name.clone(),
                    column: name.clone(),
                })
        })
        .collect()
}

fn require_primary_key(table: &TableInfo) -> Result<&ColumnInfo, PythiaError> {
    let pk = table
        .primary_key()
        .ok_or_else(|| PythiaError::NoPrimaryKey(table.name.clone()))?;
    table
        .column(pk)
        .ok_or_else(|| PythiaError::NoPrimaryKey(table.name.clone()))
}

pub fn build_insert(
    table: &TableInfo,
    data: &Map<String, Value>,
) -> Result<BuiltStatement, PythiaError> {
    if data.is_empty() {
        return Err(PythiaError::InvalidRequest("No data provided".to_string()));
    }
    let entries = require_columns(table, data)?;

    let mut columns = Vec::with_capacity(entries.len());
    let mut exprs = Vec::with_capacity(entries.len());
    let mut binds = Vec::with_capacity(entries.len());
    for (i, (col, value)) in entries.iter().enumerate() {
        columns.push(quote_ident(&col.name));
        exprs.push(cast_expr(i + 1, col));
        binds.push(value_to_text(value));
    }

    let sql = format!(
        "WITH ins AS (INSERT INTO {} ({}) VALUES ({}) RETURNING *) \
         SELECT row_to_json(ins)::jsonb AS row FROM ins",
        quote_ident(&table.name),
        columns.join(", "),
        exprs.join(", "),
    );
    Ok(BuiltStatement { sql, binds })
}

pub fn build_update(
    table: &TableInfo,
    data: &Map<String, Value>,
    id: &str,
) -> Result<BuiltStatement, PythiaError> {
    if data.is_empty() {
        return Err(PythiaError::InvalidRequest("No data provided".to_string()));
    }
    let pk = require_primary_key(table)?;
    let entries = require_columns(table, data)?;

    let mut assignments = Vec::with_capacity(entries.len());
    let mut binds = Vec::with_capacity(entries.len() + 1);
    for (i, (col, value)) in entries.iter().enumerate() {
        assignments.push(format!("{} = {}", quote_ident(&col.name), cast_expr(i + 1, col)));
        binds.push(value_to_text(value));
    }
    let where_expr = cast_expr(entries.len() + 1, pk);
    binds.push(Some(id.to_string()));

    let sql = format!(
        "WITH upd AS (UPDATE {} SET {} WHERE {} = {} RETURNING *) \
         SELECT row_to_json(upd)::jsonb AS row FROM upd",
        quote_ident(&table.name),
        assignments.join(", "),
        quote_ident(&pk.name),
        where_expr,
    );
    Ok(BuiltStatement { sql, binds })
}

pub fn build_delete(table: &TableInfo, id: &str) -> Result<BuiltStatement, PythiaError> {
    let pk = require_primary_key(table)?;
    let sql = format!(
        "WITH del AS (DELETE FROM {} WHERE {} = {} RETURNING *) \
         SELECT row_to_json(del)::jsonb AS row FROM del",
        quote_ident(&table.name),
        quote_ident(&pk.name),
        cast_expr(1, pk),
    );
    Ok(BuiltStatement {
        sql,
        binds: vec![Some(id.to_string())],
    })
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: &'q [Option<String>],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        query = query.bind(bind.as_deref());
    }
    query
}

async fn fetch_json_rows(
    pool: &PgPool,
    stmt: &BuiltStatement,
) -> Result<Vec<Value>, PythiaError> {
    let rows = bind_all(sqlx::query(&stmt.sql), &stmt.binds)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| row.try_get::<Value, _>("row").map_err(PythiaError::from))
        .collect()
}

/// `SELECT *` with LIMIT/OFFSET, rows as JSON objects.
pub async fn select_rows(
    pool: &PgPool,
    table: &TableInfo,
    limit: i64,
    offset: i64,
) -> Result<Vec<Value>, PythiaError> {
    let sql = format!(
        "SELECT row_to_json(q)::jsonb AS row FROM (SELECT * FROM {} LIMIT $1 OFFSET $2) q",
        quote_ident(&table.name),
    );
    let rows = sqlx::query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| row.try_get::<Value, _>("row").map_err(PythiaError::from))
        .collect()
}

/// Inserts one row and returns it as created (defaults filled in).
pub async fn insert_row(
    pool: &PgPool,
    table: &TableInfo,
    data: &Map<String, Value>,
) -> Result<Value, PythiaError> {
    let stmt = build_insert(table, data)?;
    let mut rows = fetch_json_rows(pool, &stmt).await?;
    rows.pop()
        .ok_or(PythiaError::Database(sqlx::Error::RowNotFound))
}

/// Updates the row addressed by the table's first primary key; `None` when no
/// row matched.
pub async fn update_row(
    pool: &PgPool,
    table: &TableInfo,
    data: &Map<String, Value>,
    id: &str,
) -> Result<Option<Value>, PythiaError> {
    let stmt = build_update(table, data, id)?;
    let mut rows = fetch_json_rows(pool, &stmt).await?;
    Ok(rows.pop())
}

/// Deletes the row addressed by the table's first primary key; `false` when
/// no row matched.
pub async fn delete_row(
    pool: &PgPool,
    table: &TableInfo,
    id: &str,
) -> Result<bool, PythiaError> {
    let stmt = build_delete(table, id)?;
    let rows = fetch_json_rows(pool, &stmt).await?;
    Ok(!rows.is_empty())
}

pub async fn count_rows(pool: &PgPool, table: &TableInfo) -> Result<i64, PythiaError> {
    let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(&table.name));
    let row = sqlx::query(&sql).fetch_one(pool).await?;
    row.try_get::<i64, _>("n").map_err(PythiaError::from)
}

/// Outcome of a raw SQL statement.
#[derive(Debug, PartialEq)]
pub enum ExecOutcome {
    /// SELECT result set, one JSON object per row.
    Rows(Vec<Value>),
    /// Any other statement: number of rows affected.
    Affected(u64),
}

pub(crate) fn is_select(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

/// Wraps a SELECT so the server materializes rows as JSON.
pub(crate) fn wrap_select(query: &str) -> String {
    let inner = query.trim().trim_end_matches(';');
    format!("SELECT row_to_json(q)::jsonb AS row FROM ({inner}) q")
}

/// Executes arbitrary SQL with optional positional text parameters. Callers
/// must gate access; this is the raw escape hatch behind the key guard.
pub async fn execute_raw(
    pool: &PgPool,
    query: &str,
    params: &[Value],
) -> Result<ExecOutcome, PythiaError> {
    let binds: Vec<Option<String>> = params.iter().map(value_to_text).collect();

    if is_select(query) {
        let wrapped = wrap_select(query);
        let rows = bind_all(sqlx::query(&wrapped), &binds)
            .fetch_all(pool)
            .await?;
        let rows = rows
            .iter()
            .map(|row| row.try_get::<Value, _>("row").map_err(PythiaError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecOutcome::Rows(rows))
    } else {
        let trimmed = query.trim().trim_end_matches(';');
        let result = bind_all(sqlx::query(trimmed), &binds).execute(pool).await?;
        Ok(ExecOutcome::Affected(result.rows_affected()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reflect::test_fixtures::{audit_log_table, users_table};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn values_bind_as_text_or_null() {
        assert_eq!(value_to_text(&json!(null)), None);
        assert_eq!(value_to_text(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_to_text(&json!(42)), Some("42".to_string()));
        assert_eq!(value_to_text(&json!(true)), Some("true".to_string()));
        assert_eq!(
            value_to_text(&json!({"a": 1})),
            Some("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn insert_builds_casted_statement() {
        let table = users_table();
        let stmt = build_insert(&table, &object(json!({"id": 7, "name": "ada"})))
            .expect("insert builds");
        assert_eq!(
            stmt.sql,
            "WITH ins AS (INSERT INTO \"users\" (\"id\", \"name\") \
             VALUES (CAST($1 AS \"int4\"), CAST($2 AS \"varchar\")) RETURNING *) \
             SELECT row_to_json(ins)::jsonb AS row FROM ins"
        );
        assert_eq!(
            stmt.binds,
            vec![Some("7".to_string()), Some("ada".to_string())]
        );
    }

    #[test]
    fn insert_rejects_empty_and_unknown() {
        let table = users_table();
        assert!(matches!(
            build_insert(&table, &Map::new()),
            Err(PythiaError::InvalidRequest(_))
        ));
        assert!(matches!(
            build_insert(&table, &object(json!({"nope": 1}))),
            Err(PythiaError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn update_targets_first_primary_key() {
        let table = users_table();
        let stmt =
            build_update(&table, &object(json!({"name": "bo"})), "5").expect("update builds");
        assert_eq!(
            stmt.sql,
            "WITH upd AS (UPDATE \"users\" SET \"name\" = CAST($1 AS \"varchar\") \
             WHERE \"id\" = CAST($2 AS \"int4\") RETURNING *) \
             SELECT row_to_json(upd)::jsonb AS row FROM upd"
        );
        assert_eq!(
            stmt.binds,
            vec![Some("bo".to_string()), Some("5".to_string())]
        );
    }

    #[test]
    fn mutations_need_a_primary_key() {
        let table = audit_log_table();
        assert!(matches!(
            build_update(&table, &object(json!({"message": "x"})), "1"),
            Err(PythiaError::NoPrimaryKey(_))
        ));
        assert!(matches!(
            build_delete(&table, "1"),
            Err(PythiaError::NoPrimaryKey(_))
        ));
    }

    #[test]
    fn delete_builds_returning_statement() {
        let table = users_table();
        let stmt = build_delete(&table, "9").expect("delete builds");
        assert_eq!(
            stmt.sql,
            "WITH del AS (DELETE FROM \"users\" WHERE \"id\" = CAST($1 AS \"int4\") \
             RETURNING *) SELECT row_to_json(del)::jsonb AS row FROM del"
        );
        assert_eq!(stmt.binds, vec![Some("9".to_string())]);
    }

    #[test]
    fn select_detection_and_wrapping() {
        assert!(is_select("SELECT 1"));
        assert!(is_select("  select * from users;"));
        assert!(!is_select("UPDATE users SET name = 'x'"));
        assert!(!is_select("sel"));
        assert_eq!(
            wrap_select("select id from users;"),
            "SELECT row_to_json(q)::jsonb AS row FROM (select id from users) q"
        );
    }

    #[test]
    fn null_values_bind_null() {
        let table = users_table();
        let stmt =
            build_insert(&table, &object(json!({"email": null}))).expect("insert builds");
        assert_eq!(stmt.binds, vec![None]);
    }
}
