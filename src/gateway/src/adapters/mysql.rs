//! MySQL/MariaDB adapter backed by a sqlx connection pool
//!
//! Placeholder syntax is `?`. Catalog discovery goes through
//! information_schema scoped to `DATABASE()`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::{returns_rows, row_bool, row_str, row_u32, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    ColumnInfo, DatabaseType, ForeignKeyAction, ForeignKeyInfo, IndexInfo, PoolStatus,
    QueryOptions, QueryResult, RowMap, SchemaInfo, TableInfo,
};

/// MySQL adapter
pub struct MySqlAdapter {
    config: DatabaseConfig,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlAdapter {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> GatewayResult<MySqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::connection("mysql adapter is not connected"))
    }

    async fn run_statement(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let pool = self.pool().await?;
        let timeout = Duration::from_millis(
            options
                .timeout_ms
                .unwrap_or(self.config.request_timeout_seconds * 1000),
        );
        let started = Instant::now();

        let outcome = if returns_rows(query) {
            let fetch = async {
                let mut q = sqlx::query(query);
                for param in &options.params {
                    q = bind_json_param(q, param);
                }
                q.fetch_all(&pool).await
            };
            match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(rows)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    let mut mapped: Vec<RowMap> = rows.iter().map(mysql_row_to_json).collect();
                    if let Some(max) = options.max_rows {
                        mapped.truncate(max);
                    }
                    Ok(QueryResult::with_rows(mapped, elapsed))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("query timed out after {:?}", timeout)),
            }
        } else {
            let exec = async {
                let mut q = sqlx::query(query);
                for param in &options.params {
                    q = bind_json_param(q, param);
                }
                q.execute(&pool).await
            };
            match tokio::time::timeout(timeout, exec).await {
                Ok(Ok(done)) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    Ok(QueryResult::with_rows_affected(done.rows_affected(), elapsed))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("statement timed out after {:?}", timeout)),
            }
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(message) => {
                debug!("mysql statement failed: {}", message);
                Ok(QueryResult::failed(
                    message,
                    started.elapsed().as_millis() as u64,
                ))
            }
        }
    }

    async fn catalog_query(
        &self,
        query: &str,
        params: Vec<serde_json::Value>,
    ) -> GatewayResult<Vec<RowMap>> {
        let result = self
            .run_statement(query, &QueryOptions::with_params(params))
            .await?;
        if !result.success {
            return Err(GatewayError::query(
                result
                    .error
                    .unwrap_or_else(|| "catalog query failed".to_string()),
            ));
        }
        Ok(result.rows)
    }

    async fn fetch_columns(&self, table: &str) -> GatewayResult<Vec<ColumnInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    column_name AS column_name,
                    data_type AS data_type,
                    ordinal_position AS ordinal_position,
                    (is_nullable = 'YES') AS nullable,
                    (extra LIKE '%auto_increment%') AS is_identity,
                    (column_key = 'PRI') AS is_primary_key,
                    character_maximum_length AS character_maximum_length,
                    numeric_precision AS numeric_precision,
                    numeric_scale AS numeric_scale,
                    column_default AS column_default
                FROM information_schema.columns
                WHERE table_schema = DATABASE() AND table_name = ?
                ORDER BY ordinal_position"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row_str(row, "column_name").unwrap_or_default(),
                data_type: row_str(row, "data_type").unwrap_or_default(),
                ordinal_position: row_u32(row, "ordinal_position").unwrap_or(0),
                nullable: row_bool(row, "nullable"),
                is_identity: row_bool(row, "is_identity"),
                is_primary_key: row_bool(row, "is_primary_key"),
                max_length: row_u32(row, "character_maximum_length"),
                precision: row_u32(row, "numeric_precision"),
                scale: row_u32(row, "numeric_scale"),
                default_value: row_str(row, "column_default"),
            })
            .collect())
    }

    async fn fetch_indexes(&self, table: &str) -> GatewayResult<Vec<IndexInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    index_name AS index_name,
                    column_name AS column_name,
                    (non_unique = 0) AS is_unique,
                    (index_name = 'PRIMARY') AS is_primary,
                    index_type AS index_type
                FROM information_schema.statistics
                WHERE table_schema = DATABASE() AND table_name = ?
                ORDER BY index_name, seq_in_index"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        let mut indexes: HashMap<String, IndexInfo> = HashMap::new();
        for row in &rows {
            let name = row_str(row, "index_name").unwrap_or_default();
            let column = row_str(row, "column_name").unwrap_or_default();
            let entry = indexes.entry(name.clone()).or_insert_with(|| IndexInfo {
                name,
                columns: Vec::new(),
                unique: row_bool(row, "is_unique"),
                primary: row_bool(row, "is_primary"),
                index_type: row_str(row, "index_type"),
            });
            entry.columns.push(column);
        }

        let mut out: Vec<IndexInfo> = indexes.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn fetch_foreign_keys(&self, table: &str) -> GatewayResult<Vec<ForeignKeyInfo>> {
        let rows = self
            .catalog_query(
                r#"SELECT
                    kcu.constraint_name AS constraint_name,
                    kcu.column_name AS source_column,
                    kcu.referenced_table_name AS target_table,
                    kcu.referenced_column_name AS target_column,
                    rc.delete_rule AS delete_rule,
                    rc.update_rule AS update_rule
                FROM information_schema.key_column_usage kcu
                JOIN information_schema.referential_constraints rc
                    ON kcu.constraint_name = rc.constraint_name
                    AND kcu.constraint_schema = rc.constraint_schema
                WHERE kcu.table_schema = DATABASE()
                    AND kcu.table_name = ?
                    AND kcu.referenced_table_name IS NOT NULL
                ORDER BY kcu.constraint_name, kcu.ordinal_position"#,
                vec![serde_json::json!(table)],
            )
            .await?;

        let mut fks: HashMap<String, ForeignKeyInfo> = HashMap::new();
        for row in &rows {
            let name = row_str(row, "constraint_name").unwrap_or_default();
            let entry = fks.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
                name,
                columns: Vec::new(),
                referenced_table: row_str(row, "target_table").unwrap_or_default(),
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse(
                    &row_str(row, "delete_rule").unwrap_or_default(),
                ),
                on_update: ForeignKeyAction::parse(
                    &row_str(row, "update_rule").unwrap_or_default(),
                ),
            });
            entry
                .columns
                .push(row_str(row, "source_column").unwrap_or_default());
            entry
                .referenced_columns
                .push(row_str(row, "target_column").unwrap_or_default());
        }

        let mut out: Vec<ForeignKeyInfo> = fks.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    async fn connect(&self) -> GatewayResult<()> {
        let url = self.config.connection_url(DatabaseType::MySql)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.pool.max_connections)
            .min_connections(self.config.pool.min_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.config.pool.idle_timeout_seconds))
            .connect(&url)
            .await
            .map_err(|e| GatewayError::connection(format!("failed to create mysql pool: {}", e)))?;

        sqlx::query("SELECT 1").fetch_one(&pool).await.map_err(|e| {
            GatewayError::connection(format!("mysql connection test failed: {}", e))
        })?;

        *self.pool.write().await = Some(pool);
        info!(
            host = %self.config.host,
            database = %self.config.database,
            "mysql connection pool created"
        );
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            info!("closing mysql connection pool");
            pool.close().await;
        }
        Ok(())
    }

    async fn execute_query(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let result = self.run_statement(query, options).await?;
        Ok(result.with_metadata(query, &options.params))
    }

    async fn get_tables(&self) -> GatewayResult<Vec<TableInfo>> {
        let rows = self
            .catalog_query(
                "SELECT table_schema AS table_schema, table_name AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                Vec::new(),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut table = TableInfo::new(row_str(row, "table_name").unwrap_or_default());
                table.schema = row_str(row, "table_schema");
                table
            })
            .collect())
    }

    async fn get_table_info(&self, table: &str) -> GatewayResult<TableInfo> {
        let columns = self.fetch_columns(table).await?;
        if columns.is_empty() {
            return Err(GatewayError::schema(format!(
                "table '{}' not found in database '{}'",
                table, self.config.database
            )));
        }

        let mut info = TableInfo::new(table);
        info.schema = Some(self.config.database.clone());
        info.columns = columns;

        match self.fetch_indexes(table).await {
            Ok(indexes) => info.indexes = indexes,
            Err(e) => warn!("index discovery failed for '{}': {}", table, e),
        }
        match self.fetch_foreign_keys(table).await {
            Ok(fks) => info.foreign_keys = fks,
            Err(e) => warn!("foreign key discovery failed for '{}': {}", table, e),
        }

        Ok(info)
    }

    async fn get_schema(&self, include_details: bool) -> GatewayResult<SchemaInfo> {
        let mut tables = self.get_tables().await?;

        if include_details {
            for table in &mut tables {
                match self.get_table_info(&table.name).await {
                    Ok(detailed) => *table = detailed,
                    Err(e) => {
                        warn!("skipping details for table '{}': {}", table.name, e);
                    }
                }
            }
        }

        Ok(SchemaInfo {
            database: self.config.database.clone(),
            database_type: DatabaseType::MySql,
            tables,
            collected_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> bool {
        match self.pool.read().await.clone() {
            Some(pool) => sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok(),
            None => false,
        }
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn pool_status(&self) -> PoolStatus {
        match self.pool.try_read().ok().and_then(|guard| guard.clone()) {
            Some(pool) => PoolStatus::new(
                pool.size(),
                pool.num_idle() as u32,
                self.config.pool.max_connections,
            ),
            None => PoolStatus::default(),
        }
    }

    fn is_connected(&self) -> bool {
        self.pool
            .try_read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Bind one JSON value in the mysql placeholder position
fn bind_json_param<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &serde_json::Value,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.clone()),
    }
}

/// Normalize one driver row into an ordered column -> JSON value mapping
fn mysql_row_to_json(row: &MySqlRow) -> RowMap {
    let mut map = RowMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = mysql_value_to_json(row, idx, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

fn mysql_value_to_json(row: &MySqlRow, idx: usize, type_name: &str) -> serde_json::Value {
    use serde_json::json;

    let upper = type_name.to_ascii_uppercase();
    if upper.contains("UNSIGNED") {
        return row
            .try_get::<Option<u64>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null);
    }

    match upper.as_str() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| json!(v))
            .unwrap_or(serde_json::Value::Null),
        "DECIMAL" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(idx)
            .map(|v| match v {
                Some(d) => json!(d.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map(|v| v.unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| match v {
                Some(ts) => json!(ts.to_rfc3339()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| match v {
                Some(ts) => json!(ts.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| match v {
                Some(d) => json!(d.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| match v {
                Some(t) => json!(t.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| match v {
                Some(bytes) => json!(hex_string(&bytes)),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| match v {
                Some(s) => json!(s),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_adapter_is_disconnected() {
        let adapter = MySqlAdapter::new(DatabaseConfig::default());
        assert!(!adapter.is_connected());
        assert_eq!(adapter.database_type(), DatabaseType::MySql);
    }

    #[tokio::test]
    async fn test_execute_query_requires_connection() {
        let adapter = MySqlAdapter::new(DatabaseConfig::default());
        let err = adapter
            .execute_query("SELECT 1", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = MySqlAdapter::new(DatabaseConfig::default());
        adapter.disconnect().await.unwrap();
        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
    }
}
