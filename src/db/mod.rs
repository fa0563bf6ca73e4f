//! Database layer: runtime schema reflection and generic row access.
//!
//! Layout:
//! - `reflect.rs`: `information_schema` reflection into a `SchemaSnapshot`
//! - `rows.rs`: dynamic CRUD and raw SQL execution over reflected tables

pub mod reflect;
pub mod rows;

pub use reflect::{ColumnInfo, ForeignKeyInfo, SchemaSnapshot, TableInfo, reflect};
pub use rows::{ExecOutcome, count_rows, delete_row, execute_raw, insert_row, select_rows, update_row};

use crate::error::PythiaError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Builds the PostgreSQL pool. Connections are established lazily; at startup
/// the initial schema reflection forces the first one.
pub fn connect(database_url: &str) -> Result<PgPool, PythiaError> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect_lazy(database_url)
        .map_err(PythiaError::from)
}
