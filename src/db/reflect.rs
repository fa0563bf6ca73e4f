//! Runtime schema reflection against the PostgreSQL catalog.
//!
//! Instead of declaring models ahead of time, the whole `public` schema is
//! discovered from `information_schema` and published as an immutable
//! [`SchemaSnapshot`]. Request handlers validate table and column names
//! against the snapshot before any SQL is built.

use crate::error::PythiaError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,

    /// Human-readable SQL type (`information_schema.columns.data_type`),
    /// e.g. `integer`, `character varying`.
    #[serde(rename = "type")]
    pub data_type: String,

    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,

    /// Internal type name (`udt_name`, e.g. `int4`, `varchar`, `_text`) used
    /// as the server-side CAST target when binding values. Not part of the
    /// API response shape.
    #[serde(skip_serializing)]
    pub udt_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForeignKeyInfo {
    pub constrained_columns: Vec<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub primary_keys: Vec<String>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First primary-key column, the one row mutations address rows by.
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_keys.first().map(String::as_str)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Immutable view of the reflected schema. Published behind an `Arc`; a
/// refresh swaps in a whole new snapshot rather than mutating in place.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableInfo>,
    pub reflected_at: DateTime<Utc>,
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            reflected_at: Utc::now(),
        }
    }
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

// information_schema exposes identifiers through domain types; the ::text
// casts keep decoding uniform.
const COLUMNS_SQL: &str = "\
SELECT table_name::text AS table_name, column_name::text AS column_name,
       data_type::text AS data_type, udt_name::text AS udt_name,
       is_nullable::text AS is_nullable, column_default::text AS column_default
FROM information_schema.columns
WHERE table_schema = 'public'
ORDER BY table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "\
SELECT tc.table_name::text AS table_name, kcu.column_name::text AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
WHERE tc.table_schema = 'public' AND tc.constraint_type = 'PRIMARY KEY'
ORDER BY tc.table_name, kcu.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "\
SELECT tc.table_name::text AS table_name, tc.constraint_name::text AS constraint_name,
       kcu.column_name::text AS column_name,
       ccu.table_name::text AS referred_table, ccu.column_name::text AS referred_column
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON tc.constraint_name = ccu.constraint_name
 AND tc.table_schema = ccu.table_schema
WHERE tc.table_schema = 'public' AND tc.constraint_type = 'FOREIGN KEY'
ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";

/// Reflects the `public` schema into a fresh [`SchemaSnapshot`].
pub async fn reflect(pool: &PgPool) -> Result<SchemaSnapshot, PythiaError> {
    let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();

    for row in sqlx::query(COLUMNS_SQL).fetch_all(pool).await? {
        let table_name: String = row.try_get("table_name")?;
        let nullable: String = row.try_get("is_nullable")?;
        let column = ColumnInfo {
            name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            nullable: nullable == "YES",
            default: row.try_get("column_default")?,
            primary_key: false,
            udt_name: row.try_get("udt_name")?,
        };
        tables
            .entry(table_name.clone())
            .or_insert_with(|| TableInfo {
                name: table_name,
                columns: Vec::new(),
                foreign_keys: Vec::new(),
                primary_keys: Vec::new(),
            })
            .columns
            .push(column);
    }

    for row in sqlx::query(PRIMARY_KEYS_SQL).fetch_all(pool).await? {
        let table_name: String = row.try_get("table_name")?;
        let column_name: String = row.try_get("column_name")?;
        if let Some(table) = tables.get_mut(&table_name) {
            if let Some(col) = table.columns.iter_mut().find(|c| c.name == column_name) {
                col.primary_key = true;
            }
            table.primary_keys.push(column_name);
        }
    }

    // Rows for one constraint arrive contiguously (ordered by constraint
    // name, then column position), so composite keys fold into the entry
    // opened by their first column.
    let mut current: Option<(String, String)> = None;
    for row in sqlx::query(FOREIGN_KEYS_SQL).fetch_all(pool).await? {
        let table_name: String = row.try_get("table_name")?;
        let constraint_name: String = row.try_get("constraint_name")?;
        let column_name: String = row.try_get("column_name")?;
        let referred_table: String = row.try_get("referred_table")?;
        let referred_column: String = row.try_get("referred_column")?;

        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };

        let key = (table_name, constraint_name);
        if current.as_ref() == Some(&key) {
            if let Some(fk) = table.foreign_keys.last_mut() {
                fk.constrained_columns.push(column_name);
                fk.referred_columns.push(referred_column);
            }
        } else {
            table.foreign_keys.push(ForeignKeyInfo {
                constrained_columns: vec![column_name],
                referred_table,
                referred_columns: vec![referred_column],
            });
            current = Some(key);
        }
    }

    Ok(SchemaSnapshot {
        tables,
        reflected_at: Utc::now(),
    })
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub fn column(name: &str, data_type: &str, udt: &str, pk: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: !pk,
            default: None,
            primary_key: pk,
            udt_name: udt.to_string(),
        }
    }

    /// `users(id int PK, name varchar, email varchar NULL)`.
    pub fn users_table() -> TableInfo {
        TableInfo {
            name: "users".to_string(),
            columns: vec![
                column("id", "integer", "int4", true),
                column("name", "character varying", "varchar", false),
                column("email", "character varying", "varchar", false),
            ],
            foreign_keys: Vec::new(),
            primary_keys: vec!["id".to_string()],
        }
    }

    /// `audit_log(message text, created_at timestamptz)` with no primary key.
    pub fn audit_log_table() -> TableInfo {
        TableInfo {
            name: "audit_log".to_string(),
            columns: vec![
                column("message", "text", "text", false),
                column("created_at", "timestamp with time zone", "timestamptz", false),
            ],
            foreign_keys: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    pub fn snapshot() -> SchemaSnapshot {
        let mut tables = BTreeMap::new();
        for t in [users_table(), audit_log_table()] {
            tables.insert(t.name.clone(), t);
        }
        SchemaSnapshot {
            tables,
            reflected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{snapshot, users_table};

    #[test]
    fn table_lookup_and_primary_key() {
        let snap = snapshot();
        assert_eq!(snap.table_names(), vec!["audit_log", "users"]);

        let users = snap.table("users").expect("users table");
        assert_eq!(users.primary_key(), Some("id"));
        assert!(users.column("email").is_some());
        assert!(users.column("missing").is_none());

        let logs = snap.table("audit_log").expect("audit_log table");
        assert_eq!(logs.primary_key(), None);
    }

    #[test]
    fn column_serializes_with_type_field() {
        let users = users_table();
        let json = serde_json::to_value(&users.columns[0]).expect("serialize column");
        assert_eq!(json["type"], "integer");
        assert_eq!(json["primary_key"], true);
        // The cast target is an internal detail, not API surface.
        assert!(json.get("udt_name").is_none());
    }
}
