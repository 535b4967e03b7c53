//! Database adapter contract and backend implementations
//!
//! One uniform capability trait wrapping one concrete driver per backend:
//! - `postgres`: PostgreSQL via sqlx
//! - `mysql`: MySQL/MariaDB via sqlx
//! - `mssql`: Microsoft SQL Server via tiberius behind a deadpool pool
//!
//! Each variant owns its own catalog SQL; column, key and index discovery
//! differs materially between backends.

pub mod mssql;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::error::GatewayResult;
use crate::types::{DatabaseType, PoolStatus, QueryOptions, QueryResult, SchemaInfo, TableInfo};

pub use mssql::MssqlAdapter;
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;

/// Uniform database capability contract.
///
/// Driver failures during statement execution come back as a `QueryResult`
/// with `success = false`; calling an execution method on an adapter that is
/// not connected is a programmer error and fails loudly instead.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Establish the pooled connection. On failure the adapter stays
    /// disconnected; there is no partially-connected state.
    async fn connect(&self) -> GatewayResult<()>;

    /// Release pool resources. Idempotent.
    async fn disconnect(&self) -> GatewayResult<()>;

    /// Bind positional parameters and execute one statement
    async fn execute_query(&self, query: &str, options: &QueryOptions)
        -> GatewayResult<QueryResult>;

    /// List base tables (name and schema only)
    async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>>;

    /// Full metadata for one table: columns, indexes, foreign keys
    async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo>;

    /// Schema snapshot. With `include_details` every table's metadata is
    /// fetched individually, which costs O(tables) round trips; per-table
    /// failures leave that table's detail arrays empty instead of aborting
    /// the whole fetch.
    async fn get_schema(&self, include_details: bool) -> GatewayResult<SchemaInfo>;

    /// Lightweight liveness probe. Never errors.
    async fn test_connection(&self) -> bool;

    /// Backend discriminator
    fn database_type(&self) -> DatabaseType;

    /// Point-in-time pool counters
    fn pool_status(&self) -> PoolStatus;

    /// Whether `connect` has succeeded and `disconnect` has not been called
    fn is_connected(&self) -> bool;
}

/// Instantiate the adapter variant matching the backend type
pub fn create_adapter(
    database_type: DatabaseType,
    config: DatabaseConfig,
) -> Arc<dyn DatabaseAdapter> {
    match database_type {
        DatabaseType::Postgres => Arc::new(PostgresAdapter::new(config)),
        DatabaseType::MySql => Arc::new(MySqlAdapter::new(config)),
        DatabaseType::SqlServer => Arc::new(MssqlAdapter::new(config)),
    }
}

/// Whether a statement produces a row set (as opposed to an affected-row
/// count). Decides between fetch and execute paths in the sqlx adapters.
pub(crate) fn returns_rows(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(
        head.as_str(),
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" | "VALUES" | "PRAGMA"
    )
}

// Typed extraction out of normalized catalog rows. The catalog queries run
// through the same execution path as user queries, so their results arrive
// as JSON row mappings.

pub(crate) fn row_str(row: &crate::types::RowMap, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub(crate) fn row_bool(row: &crate::types::RowMap, key: &str) -> bool {
    match row.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(serde_json::Value::String(s)) => {
            matches!(s.to_ascii_uppercase().as_str(), "YES" | "TRUE" | "1")
        }
        _ => false,
    }
}

pub(crate) fn row_u32(row: &crate::types::RowMap, key: &str) -> Option<u32> {
    row.get(key)
        .and_then(|v| v.as_i64())
        .and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows_classification() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  select * from users"));
        assert!(returns_rows("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(returns_rows("SHOW DATABASES"));
        assert!(returns_rows("EXPLAIN SELECT 1"));

        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("DELETE FROM t"));
        assert!(!returns_rows("BEGIN"));
        assert!(!returns_rows(""));
    }

    #[test]
    fn test_row_extraction_helpers() {
        let mut row = crate::types::RowMap::new();
        row.insert("name".into(), serde_json::json!("users"));
        row.insert("nullable".into(), serde_json::json!("YES"));
        row.insert("is_unique".into(), serde_json::json!(true));
        row.insert("identity".into(), serde_json::json!(1));
        row.insert("ordinal".into(), serde_json::json!(3));

        assert_eq!(row_str(&row, "name").as_deref(), Some("users"));
        assert!(row_bool(&row, "nullable"));
        assert!(row_bool(&row, "is_unique"));
        assert!(row_bool(&row, "identity"));
        assert!(!row_bool(&row, "missing"));
        assert_eq!(row_u32(&row, "ordinal"), Some(3));
        assert_eq!(row_u32(&row, "name"), None);
    }

    #[test]
    fn test_create_adapter_matches_type() {
        let config = DatabaseConfig::default();
        let pg = create_adapter(DatabaseType::Postgres, config.clone());
        assert_eq!(pg.database_type(), DatabaseType::Postgres);
        assert!(!pg.is_connected());

        let my = create_adapter(DatabaseType::MySql, config.clone());
        assert_eq!(my.database_type(), DatabaseType::MySql);

        let ms = create_adapter(DatabaseType::SqlServer, config);
        assert_eq!(ms.database_type(), DatabaseType::SqlServer);
    }
}
