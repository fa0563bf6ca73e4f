//! Database-context builder for LLM prompts.
//!
//! Renders the reflected schema (and, when requested, per-table row counts
//! plus sample rows) as plain text the model can ground its answers in.
//! Sampling failures are reported inline in the context text rather than
//! failing the request.

use crate::db::reflect::{SchemaSnapshot, TableInfo};
use crate::db::rows::{count_rows, select_rows};
use serde_json::Value;
use sqlx::PgPool;
use std::fmt::Write as _;
use tracing::warn;

/// Text description of every reflected table, column by column.
pub fn schema_description(snapshot: &SchemaSnapshot) -> String {
    let mut out = String::from("Database Schema:\n\n");

    for (table_name, table) in &snapshot.tables {
        let _ = writeln!(out, "Table: {table_name}");
        out.push_str("Columns:\n");

        for column in &table.columns {
            let pk_marker = if column.primary_key {
                " (Primary Key)"
            } else {
                ""
            };
            let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
            let default = column
                .default
                .as_ref()
                .map(|d| format!(" DEFAULT {d}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  - {}: {} {nullable}{default}{pk_marker}",
                column.name, column.data_type
            );
        }

        if !table.foreign_keys.is_empty() {
            out.push_str("Foreign Keys:\n");
            for fk in &table.foreign_keys {
                let constrained = fk.constrained_columns.join(", ");
                let referred = fk.referred_columns.join(", ");
                let _ = writeln!(
                    out,
                    "  - {constrained} -> {}({referred})",
                    fk.referred_table
                );
            }
        }

        out.push('\n');
    }

    out
}

/// Renders sampled rows as a ` | `-joined text table in column order.
pub(crate) fn format_sample(table: &TableInfo, rows: &[Value], limit: i64) -> String {
    let columns = table.column_names();

    let mut out = format!(
        "Sample data from {} (showing up to {limit} rows):\n\n",
        table.name
    );
    out.push_str(&columns.join(" | "));
    out.push('\n');

    let width = columns.iter().map(String::len).sum::<usize>()
        + 3 * columns.len().saturating_sub(1);
    out.push_str(&"-".repeat(width));
    out.push('\n');

    for row in rows {
        let rendered: Vec<String> = columns
            .iter()
            .map(|col| match row.get(col) {
                None | Some(Value::Null) => "NULL".to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        out.push_str(&rendered.join(" | "));
        out.push('\n');
    }

    out
}

/// Sample data block for one table, or an inline error message.
pub async fn table_sample(pool: &PgPool, table: &TableInfo, limit: i64) -> String {
    match select_rows(pool, table, limit, 0).await {
        Ok(rows) => format_sample(table, &rows, limit),
        Err(err) => {
            warn!("Failed to sample table {}: {err}", table.name);
            format!("Error retrieving sample data from {}: {err}", table.name)
        }
    }
}

/// Row-count line for one table, or an inline error message.
pub async fn table_row_count(pool: &PgPool, table: &TableInfo) -> String {
    match count_rows(pool, table).await {
        Ok(n) => format!("Table {} has {n} rows.", table.name),
        Err(err) => {
            warn!("Failed to count rows in {}: {err}", table.name);
            format!("Error counting rows in {}: {err}", table.name)
        }
    }
}

/// Full LLM context: schema description, optional per-table enrichment for
/// the tables the request singled out, and the user query.
pub async fn build_context(
    pool: &PgPool,
    snapshot: &SchemaSnapshot,
    prompt: &str,
    tables: &[String],
    sample_rows: i64,
) -> String {
    let mut context = schema_description(snapshot);

    for name in tables {
        match snapshot.table(name) {
            Some(table) => {
                context.push('\n');
                context.push_str(&table_row_count(pool, table).await);
                context.push('\n');
                context.push_str(&table_sample(pool, table, sample_rows).await);
                context.push('\n');
            }
            None => {
                let _ = writeln!(context, "\nTable {name} not found.");
            }
        }
    }

    let _ = writeln!(context, "\nUser Query: {prompt}");
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::reflect::test_fixtures::{snapshot, users_table};
    use serde_json::json;

    #[test]
    fn schema_description_lists_tables_and_columns() {
        let text = schema_description(&snapshot());
        assert!(text.starts_with("Database Schema:\n\n"));
        assert!(text.contains("Table: users\n"));
        assert!(text.contains("  - id: integer NOT NULL (Primary Key)\n"));
        assert!(text.contains("  - email: character varying NULL\n"));
        assert!(text.contains("Table: audit_log\n"));
        // No FK section when a table has no foreign keys.
        assert!(!text.contains("Foreign Keys:"));
    }

    #[test]
    fn schema_description_renders_foreign_keys() {
        let mut snap = snapshot();
        let mut orders = users_table();
        orders.name = "orders".to_string();
        orders.foreign_keys = vec![crate::db::reflect::ForeignKeyInfo {
            constrained_columns: vec!["user_id".to_string()],
            referred_table: "users".to_string(),
            referred_columns: vec!["id".to_string()],
        }];
        snap.tables.insert("orders".to_string(), orders);

        let text = schema_description(&snap);
        assert!(text.contains("Foreign Keys:\n  - user_id -> users(id)\n"));
    }

    #[test]
    fn sample_renders_rows_in_column_order() {
        let table = users_table();
        let rows = vec![
            json!({"id": 1, "name": "ada", "email": "ada@example.com"}),
            json!({"id": 2, "name": "bo", "email": null}),
        ];
        let text = format_sample(&table, &rows, 5);
        assert!(text.starts_with("Sample data from users (showing up to 5 rows):\n\n"));
        assert!(text.contains("id | name | email\n"));
        assert!(text.contains("1 | ada | ada@example.com\n"));
        assert!(text.contains("2 | bo | NULL\n"));
        // Separator: column name lengths plus 3 per separator.
        let width = "id".len() + "name".len() + "email".len() + 3 * 2;
        assert!(text.contains(&"-".repeat(width)));
    }
}
